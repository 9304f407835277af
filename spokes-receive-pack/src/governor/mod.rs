//! Client for the governor, the local daemon that gates resource-intensive
//! repository operations.
//!
//! The wire protocol is newline-terminated JSON objects over a Unix stream
//! socket. A session is `update` (who we are) followed by a `schedule` loop
//! (`continue` / `wait <secs> <reason>` / `fail <reason>`), and ends with a
//! `finish` message carrying usage counters.
//!
//! A governor that cannot be reached must never block a push: every
//! connection-level problem downgrades the handle to a null one whose
//! mutators are no-ops, and the push runs ungoverned. The only hard stops
//! are an explicit `fail` reply and, when `FAIL_CLOSED=1`, a schedule
//! timeout.

mod procstats;

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

const DEFAULT_SOCKET_PATH: &str = "/run/governor/client.sock";
const DEFAULT_SCHEDULE_TIMEOUT: Duration = Duration::from_secs(1);

/// The governor refused to schedule this push.
#[derive(Debug, thiserror::Error)]
#[error("governor refuses to schedule us: {reason}")]
pub struct FailError {
    pub reason: String,
}

/// Why [`start`] gave up instead of returning a handle.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Fail(#[from] FailError),
    #[error("governor did not answer the schedule request in time: {0}")]
    Timeout(std::io::Error),
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Serialize)]
struct Message<'a, T: Serialize> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a T>,
}

/// The `update` payload identifying this process and its request metadata.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub(crate) struct UpdateData {
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub pid: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub program: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub git_dir: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub repo_name: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub repo_id: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub network_id: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub user_id: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub real_ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub features: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub via: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssh_connection: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub babeld: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub git_protocol: String,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub pubkey_verifier_id: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub pubkey_creator_id: u32,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub gitmon_delay: u32,
}

/// The `finish` payload with the session's usage counters.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub(crate) struct FinishData {
    pub result_code: u8,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub cpu: u32,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub disk_read_bytes: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub disk_write_bytes: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub rss: u64,
    #[serde(skip_serializing_if = "is_zero_u64")]
    pub receive_pack_size: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fatal: String,
}

fn send<T: Serialize>(
    w: &mut dyn Write,
    command: &str,
    data: Option<&T>,
) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(&Message { command, data })
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push(b'\n');
    w.write_all(&line)
}

/// A decoded reply to a `schedule` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScheduleReply {
    Continue,
    Wait { seconds: Option<u64>, reason: String },
    Fail { reason: String },
}

/// Parse one reply line (without its trailing newline).
pub(crate) fn parse_schedule_reply(line: &str) -> Result<ScheduleReply, String> {
    let mut words = line.splitn(3, ' ');
    match words.next() {
        Some("continue") => Ok(ScheduleReply::Continue),
        Some("wait") => {
            let seconds = words.next().and_then(|w| w.parse().ok());
            let reason = words.next().unwrap_or("UNKNOWN").to_owned();
            Ok(ScheduleReply::Wait { seconds, reason })
        }
        Some("fail") => {
            let mut reason = words.next().unwrap_or("UNKNOWN").to_owned();
            if let Some(rest) = words.next() {
                reason.push(' ');
                reason.push_str(rest);
            }
            Ok(ScheduleReply::Fail { reason })
        }
        _ => Err(format!("unexpected response {line:?} from governor")),
    }
}

fn socket_path() -> String {
    std::env::var("GIT_SOCKSTAT_PATH").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_owned())
}

fn schedule_timeout() -> Duration {
    std::env::var("SCHEDULE_CMD_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_SCHEDULE_TIMEOUT)
}

fn fail_closed() -> bool {
    std::env::var("FAIL_CLOSED").as_deref() == Ok("1")
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

/// Collect the sockstat fields the governor cares about from the
/// environment.
pub(crate) fn read_sockstat<I>(environ: I) -> UpdateData
where
    I: IntoIterator<Item = (String, String)>,
{
    use crate::sockstat::{string_value, uint32_value, PREFIX};

    let mut data = UpdateData::default();
    for (name, value) in environ {
        let Some(name) = name.strip_prefix(PREFIX) else {
            continue;
        };
        match name {
            "repo_name" => data.repo_name = string_value(&value).to_owned(),
            "repo_id" => data.repo_id = uint32_value(&value),
            "network_id" => data.network_id = uint32_value(&value),
            "user_id" => data.user_id = uint32_value(&value),
            "real_ip" => data.real_ip = string_value(&value).to_owned(),
            "request_id" => data.request_id = string_value(&value).to_owned(),
            "user_agent" => data.user_agent = string_value(&value).to_owned(),
            "features" => data.features = string_value(&value).to_owned(),
            "via" => data.via = string_value(&value).to_owned(),
            "ssh_connection" => data.ssh_connection = string_value(&value).to_owned(),
            "babeld" => data.babeld = string_value(&value).to_owned(),
            "git_protocol" => data.git_protocol = string_value(&value).to_owned(),
            "pubkey_verifier_id" => data.pubkey_verifier_id = uint32_value(&value),
            "pubkey_creator_id" => data.pubkey_creator_id = uint32_value(&value),
            "gitmon_delay" => data.gitmon_delay = uint32_value(&value),
            _ => {}
        }
    }
    data
}

/// Connect to the governor and run the `update` → `schedule` handshake.
///
/// Any connection-level problem returns a null handle and the push runs
/// ungoverned. A `fail` reply, or a schedule timeout under `FAIL_CLOSED=1`,
/// aborts the push.
pub fn start(git_dir: &Path) -> Result<Conn, StartError> {
    let Ok(mut sock) = UnixStream::connect(socket_path()) else {
        return Ok(Conn::null());
    };

    let mut data = read_sockstat(std::env::vars());
    data.pid = std::process::id();
    data.program = "spokes-receive-pack".to_owned();
    data.git_dir = git_dir.to_string_lossy().into_owned();
    if send(&mut sock, "update", Some(&data)).is_err() {
        return Ok(Conn::null());
    }

    let timeout = schedule_timeout();
    if sock.set_read_timeout(Some(timeout)).is_err() {
        return Ok(Conn::null());
    }
    let Ok(read_half) = sock.try_clone() else {
        return Ok(Conn::null());
    };
    let mut replies = BufReader::new(read_half);

    loop {
        if send::<UpdateData>(&mut sock, "schedule", None).is_err() {
            return Ok(Conn::null());
        }

        let mut line = String::new();
        match replies.read_line(&mut line) {
            Ok(0) => return Ok(Conn::null()),
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {
                if fail_closed() {
                    return Err(StartError::Timeout(e));
                }
                tracing::debug!("governor schedule timed out, continuing ungoverned");
                return Ok(Conn::null());
            }
            Err(_) => return Ok(Conn::null()),
        }

        match parse_schedule_reply(line.trim_end_matches('\n')) {
            Ok(ScheduleReply::Continue) => return Ok(Conn::active(sock)),
            Ok(ScheduleReply::Wait { seconds, reason }) => {
                if seconds.is_none() {
                    tracing::warn!("governor 'wait' duration could not be parsed");
                }
                tracing::debug!(reason = %reason, "governor asked us to wait");
                std::thread::sleep(Duration::from_secs(seconds.unwrap_or(1)));
            }
            Ok(ScheduleReply::Fail { reason }) => {
                return Err(StartError::Fail(FailError { reason }));
            }
            Err(reply) => {
                tracing::debug!(reply = %reply, "continuing ungoverned");
                return Ok(Conn::null());
            }
        }
    }
}

/// A handle to the governor session. All mutators are safe no-ops on a null
/// handle.
#[derive(Debug, Default)]
pub struct Conn {
    sock: Option<UnixStream>,
    finish: FinishData,
}

impl Conn {
    /// A handle with no connection behind it.
    pub fn null() -> Self {
        Self::default()
    }

    fn active(sock: UnixStream) -> Self {
        Self {
            sock: Some(sock),
            finish: FinishData::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.sock.is_some()
    }

    /// Remember an error to include with the `finish` message.
    pub fn set_error(&mut self, exit_code: u8, message: &str) {
        self.finish.result_code = exit_code;
        self.finish.fatal = message.to_owned();
    }

    /// Remember the incoming packfile's size; zero and negative sizes are
    /// ignored.
    pub fn set_receive_pack_size(&mut self, size: i64) {
        if size > 0 {
            self.finish.receive_pack_size = size as u64;
        }
    }

    /// Sample usage counters, send the `finish` message, and close the
    /// connection. Safe to call more than once.
    pub fn finish(&mut self) {
        let Some(mut sock) = self.sock.take() else {
            return;
        };

        let stats = procstats::sample();
        self.finish.cpu = stats.cpu_ms;
        self.finish.rss = stats.rss_bytes;
        self.finish.disk_read_bytes = stats.disk_read_bytes;
        self.finish.disk_write_bytes = stats.disk_write_bytes;

        if let Err(e) = send(&mut sock, "finish", Some(&self.finish)) {
            tracing::debug!(error = %e, "could not send governor finish");
        }
    }
}
