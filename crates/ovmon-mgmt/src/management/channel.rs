//! Command framing and reply accumulation on top of a [`Transport`].
//!
//! The management interface has no length prefix. How much to read after a
//! command is decided by the command itself, see [`ReplyDiscipline`].

use crate::management::transport::Transport;
use crate::management::types::*;
use log::debug;

/// How the reply to a command is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDiscipline {
    /// Nothing is read back (`kill`, `client-kill`, `quit`).
    NoReply,
    /// Exactly one chunk (`load-stats`).
    SingleChunk,
    /// Read until a line `END`.
    UntilEnd,
}

impl ReplyDiscipline {
    pub fn for_command(command: &str) -> Self {
        let command = command.trim();
        if command.starts_with("kill") || command.starts_with("client-kill") || command == "quit" {
            Self::NoReply
        } else if command == "load-stats" {
            Self::SingleChunk
        } else {
            Self::UntilEnd
        }
    }
}

/// True once `buf` ends with an `END` line followed by a line break.
pub fn ends_with_end_line(buf: &str) -> bool {
    let body = match buf.strip_suffix("\r\n").or_else(|| buf.strip_suffix('\n')) {
        Some(b) => b,
        None => return false,
    };
    body == "END" || body.ends_with("\nEND")
}

/// If `buf` is a complete reply made of a single `ERROR:` line (real-time
/// `>` notifications aside), return that line.
pub fn error_reply(buf: &str) -> Option<&str> {
    if !buf.ends_with('\n') {
        return None;
    }
    let mut lines = buf
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('>'));
    let first = lines.next()?;
    if lines.next().is_none() && first.starts_with("ERROR:") {
        Some(first)
    } else {
        None
    }
}

/// True for the one-line acknowledgement OpenVPN sends after `kill`/`client-kill`.
fn is_ack_line(line: &str) -> bool {
    line.starts_with("SUCCESS:") || line.starts_with("ERROR:")
}

/// Request/response channel owning one transport.
pub struct CommandChannel<T: Transport> {
    transport: T,
    /// Bytes received but not yet handed out as part of a reply.
    pending: Vec<u8>,
    /// Acknowledgements still owed for fire-and-forget commands.
    unacked: usize,
}

impl<T: Transport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: Vec::new(),
            unacked: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Send `command` and collect its reply.
    ///
    /// Fire-and-forget commands return an empty string. Their acknowledgement
    /// line is consumed in front of the next reply.
    pub async fn send_command(&mut self, command: &str) -> MonitorResult<String> {
        let discipline = ReplyDiscipline::for_command(command);
        debug!("mgmt <- {}", command);
        self.transport
            .send(format!("{}\n", command).as_bytes())
            .await?;

        let reply = match discipline {
            ReplyDiscipline::NoReply => {
                self.unacked += 1;
                return Ok(String::new());
            }
            ReplyDiscipline::SingleChunk => {
                self.skip_acks().await?;
                if self.pending.is_empty() {
                    self.fill().await?;
                }
                String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned()
            }
            ReplyDiscipline::UntilEnd => {
                self.skip_acks().await?;
                self.read_until_end().await?
            }
        };
        debug!("mgmt -> {} bytes for '{}'", reply.len(), command);

        if let Some(line) = error_reply(&reply) {
            return Err(MonitorError::new(
                MonitorErrorKind::CommandFailed,
                format!("Management interface rejected '{}'", command),
            )
            .with_detail(line.trim_start_matches("ERROR:").trim()));
        }
        Ok(reply)
    }

    async fn fill(&mut self) -> MonitorResult<()> {
        let chunk = self.transport.receive_chunk().await?;
        self.pending.extend_from_slice(&chunk);
        Ok(())
    }

    /// Drop the `SUCCESS:`/`ERROR:` lines owed for earlier fire-and-forget
    /// commands, plus any `>` notifications around them. Stops at the first
    /// other line, which already belongs to the current reply.
    async fn skip_acks(&mut self) -> MonitorResult<()> {
        while self.unacked > 0 {
            let Some(eol) = self.pending.iter().position(|b| *b == b'\n') else {
                self.fill().await?;
                continue;
            };
            let line = String::from_utf8_lossy(&self.pending[..eol]).trim().to_string();
            if is_ack_line(&line) {
                debug!("mgmt -> acknowledgement '{}'", line);
                self.unacked -= 1;
            } else if !line.is_empty() && !line.starts_with('>') {
                self.unacked = 0;
                break;
            }
            self.pending.drain(..=eol);
        }
        Ok(())
    }

    async fn read_until_end(&mut self) -> MonitorResult<String> {
        loop {
            {
                let text = String::from_utf8_lossy(&self.pending);
                if ends_with_end_line(&text) || error_reply(&text).is_some() {
                    let reply = text.into_owned();
                    self.pending.clear();
                    return Ok(reply);
                }
            }
            self.fill().await?;
        }
    }

    /// Tell the server we're leaving. No reply is read.
    pub async fn quit(&mut self) -> MonitorResult<()> {
        self.send_command(MgmtCommands::QUIT).await.map(|_| ())
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Command builders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Management commands used by the monitor.
pub struct MgmtCommands;

impl MgmtCommands {
    pub const VERSION: &'static str = "version";
    pub const STATE: &'static str = "state";
    pub const LOAD_STATS: &'static str = "load-stats";
    pub const STATUS: &'static str = "status 2";
    pub const QUIT: &'static str = "quit";

    pub fn client_kill(client_id: u64) -> String {
        format!("client-kill {}", client_id)
    }

    /// `kill <common-name>` or `kill <ip:port>`.
    pub fn kill(target: &str) -> String {
        format!("kill {}", target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::testing::ScriptedTransport;

    const VERSION_REPLY: &str = "OpenVPN Version: OpenVPN 2.4.4 x86_64-pc-linux-gnu [SSL (OpenSSL)] [LZO] [LZ4] [EPOLL] [PKCS11] [MH/PKTINFO] [AEAD] built on Sep  5 2018\r\nManagement Version: 1\r\nEND\r\n";

    // ── Disciplines ──────────────────────────────────────────────

    #[test]
    fn discipline_for_commands() {
        assert_eq!(ReplyDiscipline::for_command("kill someclient"), ReplyDiscipline::NoReply);
        assert_eq!(ReplyDiscipline::for_command("client-kill 12"), ReplyDiscipline::NoReply);
        assert_eq!(ReplyDiscipline::for_command("quit"), ReplyDiscipline::NoReply);
        assert_eq!(ReplyDiscipline::for_command("load-stats"), ReplyDiscipline::SingleChunk);
        assert_eq!(ReplyDiscipline::for_command("status 2"), ReplyDiscipline::UntilEnd);
        assert_eq!(ReplyDiscipline::for_command("version"), ReplyDiscipline::UntilEnd);
    }

    #[test]
    fn end_line_detection() {
        assert!(ends_with_end_line("END\r\n"));
        assert!(ends_with_end_line("a\r\nEND\r\n"));
        assert!(ends_with_end_line("a\nEND\n"));
        assert!(!ends_with_end_line("a\r\nEND"));
        assert!(!ends_with_end_line("a\r\nEN"));
        assert!(!ends_with_end_line("BACKEND\r\n"));
        assert!(!ends_with_end_line(""));
    }

    #[test]
    fn error_reply_detection() {
        assert_eq!(
            error_reply("ERROR: unknown command, enter 'help' for more options\r\n"),
            Some("ERROR: unknown command, enter 'help' for more options")
        );
        assert_eq!(
            error_reply(">CLIENT:ESTABLISHED,3\r\nERROR: bad\r\n"),
            Some("ERROR: bad")
        );
        assert_eq!(error_reply("ERROR: partial"), None);
        assert_eq!(error_reply("line\r\nERROR: x\r\n"), None);
    }

    // ── Accumulation ─────────────────────────────────────────────

    #[tokio::test]
    async fn multi_line_reply_split_across_three_chunks() {
        let (a, rest) = VERSION_REPLY.split_at(17);
        let (b, c) = rest.split_at(120);
        let transport = ScriptedTransport::new().reply_chunks("version", &[a, b, c]);
        let log = transport.log();
        let mut ch = CommandChannel::new(transport);

        let reply = ch.send_command("version").await.unwrap();
        assert_eq!(reply, VERSION_REPLY);
        let log = log.lock().unwrap();
        assert_eq!(log.sent, vec!["version\n".to_string()]);
        assert_eq!(log.reads, 3);
    }

    #[tokio::test]
    async fn end_split_inside_terminator() {
        let transport = ScriptedTransport::new().reply_chunks("state", &["1,CONNECTED,SUCCESS\r\nE", "ND\r", "\n"]);
        let mut ch = CommandChannel::new(transport);
        let reply = ch.send_command("state").await.unwrap();
        assert_eq!(reply, "1,CONNECTED,SUCCESS\r\nEND\r\n");
    }

    #[tokio::test]
    async fn load_stats_reads_exactly_one_chunk() {
        let transport = ScriptedTransport::new()
            .reply_chunks("load-stats", &["SUCCESS: nclients=1,", "bytesin=2,bytesout=3\r\n"]);
        let log = transport.log();
        let mut ch = CommandChannel::new(transport);

        let reply = ch.send_command("load-stats").await.unwrap();
        assert_eq!(reply, "SUCCESS: nclients=1,");
        assert_eq!(log.lock().unwrap().reads, 1);
    }

    #[tokio::test]
    async fn kill_does_not_read() {
        let transport = ScriptedTransport::new();
        let log = transport.log();
        let mut ch = CommandChannel::new(transport);

        let reply = ch.send_command("kill someclient").await.unwrap();
        assert!(reply.is_empty());
        let log = log.lock().unwrap();
        assert_eq!(log.sent, vec!["kill someclient\n".to_string()]);
        assert_eq!(log.reads, 0);
    }

    #[tokio::test]
    async fn kill_ack_consumed_before_load_stats() {
        let transport = ScriptedTransport::new()
            .reply("client-kill 3", "SUCCESS: client-kill command succeeded\r\n")
            .reply("load-stats", "SUCCESS: nclients=1,bytesin=2,bytesout=3\r\n");
        let log = transport.log();
        let mut ch = CommandChannel::new(transport);

        assert!(ch.send_command("client-kill 3").await.unwrap().is_empty());
        assert_eq!(log.lock().unwrap().reads, 0);
        let reply = ch.send_command("load-stats").await.unwrap();
        assert_eq!(reply, "SUCCESS: nclients=1,bytesin=2,bytesout=3\r\n");
    }

    #[tokio::test]
    async fn kill_error_ack_does_not_fail_next_command() {
        let transport = ScriptedTransport::new()
            .reply("client-kill 99", "ERROR: client-kill command failed\r\n")
            .reply("state", "1,CONNECTED,SUCCESS\r\nEND\r\n")
            .reply("version", "OpenVPN Version: x\r\nEND\r\n");
        let mut ch = CommandChannel::new(transport);

        ch.send_command("client-kill 99").await.unwrap();
        assert_eq!(ch.send_command("state").await.unwrap(), "1,CONNECTED,SUCCESS\r\nEND\r\n");
        assert_eq!(ch.send_command("version").await.unwrap(), "OpenVPN Version: x\r\nEND\r\n");
    }

    #[tokio::test]
    async fn ack_sharing_a_chunk_with_the_next_reply() {
        let transport = ScriptedTransport::new().reply(
            "state",
            "SUCCESS: common name 'alice' found, 1 client(s) killed\r\n>CLIENT:DISCONNECT,3\r\nSUCCESS: client-kill command succeeded\r\n1,CONNECTED,SUCCESS\r\nEND\r\n",
        );
        let mut ch = CommandChannel::new(transport);

        ch.send_command("kill alice").await.unwrap();
        ch.send_command("client-kill 3").await.unwrap();
        assert_eq!(ch.send_command("state").await.unwrap(), "1,CONNECTED,SUCCESS\r\nEND\r\n");
    }

    #[tokio::test]
    async fn missing_ack_leaves_reply_intact() {
        let transport = ScriptedTransport::new().reply("state", "1,CONNECTED,SUCCESS\r\nEND\r\n");
        let mut ch = CommandChannel::new(transport);

        ch.send_command("kill alice").await.unwrap();
        assert_eq!(ch.send_command("state").await.unwrap(), "1,CONNECTED,SUCCESS\r\nEND\r\n");
    }

    #[tokio::test]
    async fn error_line_ends_reply() {
        let transport = ScriptedTransport::new()
            .reply_chunks("bogus", &["ERROR: unknown command, enter 'help' for more options\r\n"]);
        let mut ch = CommandChannel::new(transport);
        let err = ch.send_command("bogus").await.unwrap_err();
        assert_eq!(err.kind, MonitorErrorKind::CommandFailed);
        assert_eq!(
            err.detail.as_deref(),
            Some("unknown command, enter 'help' for more options")
        );
    }

    #[tokio::test]
    async fn missing_end_surfaces_read_timeout() {
        let transport = ScriptedTransport::new().reply_chunks("state", &["1,CONNECTED,SUCCESS\r\n"]);
        let mut ch = CommandChannel::new(transport);
        let err = ch.send_command("state").await.unwrap_err();
        assert_eq!(err.kind, MonitorErrorKind::Timeout);
    }

    #[tokio::test]
    async fn quit_is_fire_and_forget() {
        let transport = ScriptedTransport::new();
        let log = transport.log();
        let mut ch = CommandChannel::new(transport);
        ch.quit().await.unwrap();
        ch.close();
        assert!(!ch.is_open());
        let log = log.lock().unwrap();
        assert_eq!(log.sent, vec!["quit\n".to_string()]);
        assert_eq!(log.reads, 0);
        assert_eq!(log.closes, 1);
    }

    // ── Builders ─────────────────────────────────────────────────

    #[test]
    fn command_builders() {
        assert_eq!(MgmtCommands::client_kill(42), "client-kill 42");
        assert_eq!(MgmtCommands::kill("10.0.0.2:51234"), "kill 10.0.0.2:51234");
        assert_eq!(MgmtCommands::STATUS, "status 2");
    }
}
