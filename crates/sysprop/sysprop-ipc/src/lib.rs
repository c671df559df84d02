//! C6: the mutation-request side of the protocol. A caller without direct
//! write access to the area sends a fixed-size message over a Unix domain
//! stream socket to the service that owns the writable mapping, then waits
//! for the service to hang up the connection as its completion signal.

use std::io::{self, ErrorKind, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

pub use sysprop_area::{NAME_MAX_LEN, VALUE_MAX_LEN};

/// How long the client waits for the service to hang up after a send
/// before giving up and treating the request as accepted anyway. The
/// service is sometimes slow (busy spawning a child process), so a
/// timeout here is not distinguishable from success — a caller that
/// needs a guarantee must re-read the property afterwards.
const ACK_POLL_TIMEOUT_MS: i32 = 250;

const CMD_SET_PROPERTY: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SetError {
    #[error("property name or value length out of range")]
    Invalid,
    #[error("could not reach property service: {0}")]
    Io(#[from] io::Error),
}

/// Wire layout of a set-property request. `#[repr(C)]` with fixed-size
/// name/value fields so both sides agree on `size_of::<SetRequest>()`
/// regardless of what's actually in the trailing bytes of each field.
#[repr(C)]
struct SetRequest {
    cmd: u32,
    name: [u8; NAME_MAX_LEN],
    value: [u8; VALUE_MAX_LEN],
}

impl SetRequest {
    fn new(key: &str, value: &str) -> Result<Self, SetError> {
        if key.is_empty() || key.len() >= NAME_MAX_LEN || value.len() >= VALUE_MAX_LEN {
            return Err(SetError::Invalid);
        }
        let mut req = SetRequest {
            cmd: CMD_SET_PROPERTY,
            name: [0u8; NAME_MAX_LEN],
            value: [0u8; VALUE_MAX_LEN],
        };
        req.name[..key.len()].copy_from_slice(key.as_bytes());
        req.value[..value.len()].copy_from_slice(value.as_bytes());
        Ok(req)
    }

    fn as_bytes(&self) -> &[u8] {
        // SAFETY: SetRequest is a #[repr(C)] struct of plain integer and
        // byte-array fields with no padding-sensitive invariants; reading
        // it as raw bytes for a fixed-size wire message is sound.
        unsafe {
            std::slice::from_raw_parts(
                (self as *const SetRequest) as *const u8,
                std::mem::size_of::<SetRequest>(),
            )
        }
    }
}

/// Reads a request previously produced by [`SetRequest::as_bytes`] back
/// into `(name, value)`, as the service side of the protocol does.
pub fn decode_request(buf: &[u8]) -> Option<(String, String)> {
    if buf.len() < std::mem::size_of::<SetRequest>() {
        return None;
    }
    let cmd = u32::from_ne_bytes(buf[0..4].try_into().ok()?);
    if cmd != CMD_SET_PROPERTY {
        return None;
    }
    let name_start = 4;
    let name_end = name_start + NAME_MAX_LEN;
    let value_end = name_end + VALUE_MAX_LEN;
    let name = cstr_field(&buf[name_start..name_end])?;
    let value = cstr_field(&buf[name_end..value_end])?;
    Some((name, value))
}

fn cstr_field(field: &[u8]) -> Option<String> {
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..len]).ok().map(str::to_owned)
}

/// Size of the fixed wire message, for services sizing their receive buffer.
pub fn request_size() -> usize {
    std::mem::size_of::<SetRequest>()
}

/// Sends a set-property request to the service listening on
/// `socket_path` and waits (briefly) for acknowledgement.
///
/// Matches the original client procedure: connect, send the whole
/// message in one write, then poll the socket for `POLLHUP` up to 250ms.
/// A timeout is treated the same as success, because the service may
/// simply be slow; only a connect or send failure is reported as an error.
pub fn set(socket_path: &str, key: &str, value: &str) -> Result<(), SetError> {
    let req = SetRequest::new(key, value)?;

    let mut stream = connect_retrying(socket_path)?;
    send_whole_message(&mut stream, req.as_bytes())?;
    poll_for_hangup(&stream, ACK_POLL_TIMEOUT_MS);
    // The stream is dropped (and closed) here regardless of how the poll
    // came back, matching the original's unconditional close.
    Ok(())
}

fn connect_retrying(socket_path: &str) -> io::Result<UnixStream> {
    loop {
        match UnixStream::connect(socket_path) {
            Ok(s) => return Ok(s),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// A single `send()`, retried only on `EINTR`. Anything short of the
/// whole message is a failure here, not a cue to keep writing — matching
/// `send_prop_msg`'s `r == sizeof(prop_msg)` gate in the original.
fn send_whole_message(stream: &mut UnixStream, buf: &[u8]) -> io::Result<()> {
    loop {
        match stream.write(buf) {
            Ok(n) if n == buf.len() => return Ok(()),
            Ok(n) => {
                return Err(io::Error::other(format!(
                    "short write to property service: sent {n} of {} bytes",
                    buf.len()
                )));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Blocks up to `timeout_ms` waiting for the peer to close its end.
/// Any outcome other than "interrupted, try again" is treated as done:
/// a real hangup, an error on the fd, and a plain timeout are all the
/// same to the caller (see module docs on why a timeout isn't a failure).
fn poll_for_hangup(stream: &UnixStream, timeout_ms: i32) {
    let fd = stream.as_raw_fd();
    let mut pfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    loop {
        let r = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if r < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            tracing::warn!(error = %err, "poll failed while waiting for property service ack");
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    #[test]
    fn request_roundtrips_through_decode() {
        let req = SetRequest::new("ro.debuggable", "1").unwrap();
        let (name, value) = decode_request(req.as_bytes()).unwrap();
        assert_eq!(name, "ro.debuggable");
        assert_eq!(value, "1");
    }

    #[test]
    fn rejects_oversized_name_and_value() {
        let long_name = "a".repeat(NAME_MAX_LEN);
        assert!(matches!(SetRequest::new(&long_name, "x"), Err(SetError::Invalid)));

        let long_value = "a".repeat(VALUE_MAX_LEN);
        assert!(matches!(SetRequest::new("k", &long_value), Err(SetError::Invalid)));
    }

    #[test]
    fn set_delivers_message_and_returns_after_service_hangs_up() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("propd.sock");
        let sock_path_str = sock_path.to_str().unwrap().to_string();

        let listener = UnixListener::bind(&sock_path).unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; request_size()];
            conn.read_exact(&mut buf).unwrap();
            decode_request(&buf).unwrap()
            // conn drops here, closing the socket (the ack).
        });

        set(&sock_path_str, "debug.test", "on").unwrap();
        let (name, value) = server.join().unwrap();
        assert_eq!(name, "debug.test");
        assert_eq!(value, "on");
    }

    #[test]
    fn set_rejects_invalid_key_before_touching_the_network() {
        let err = set("/nonexistent/socket/path", "", "value").unwrap_err();
        assert!(matches!(err, SetError::Invalid));
    }
}
