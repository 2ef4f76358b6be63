use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use mio::unix::EventedFd;
use mio::{Events, Poll, PollOpt, Ready, Token};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

const STDIN_TOKEN: Token = Token(0);
const STDOUT_TOKEN: Token = Token(1);

/// A readiness notification for one of the helper's stdio pipes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProcessEvent {
    Writable,
    Readable,
}

/// Spawns the SFTP helper and exposes nonblocking read/write plus readiness polling over its
/// stdio pipes.
///
/// Grounded on the teacher's `Endpoint`, which owns a `mio::Poll` and drains a bounded
/// `mio::Events` buffer every tick (`endpoint.rs::sync`). Here the two pollable sources are the
/// helper's stdin (write-readiness) and stdout (data-available) pipes rather than a
/// `TcpListener` and its accepted streams, and `nix::fcntl` takes the place of the `socket2`
/// non-blocking setup the teacher's listener uses.
pub struct ChildProcess {
    child: Child,
    poll: Poll,
    events: Events,
}

impl ChildProcess {
    pub fn spawn(program: &str, args: &[String]) -> io::Result<ChildProcess> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin_fd = child.stdin.as_ref().expect("piped stdin").as_raw_fd();
        let stdout_fd = child.stdout.as_ref().expect("piped stdout").as_raw_fd();

        set_nonblocking(stdin_fd)?;
        set_nonblocking(stdout_fd)?;

        let poll = Poll::new()?;
        poll.register(&EventedFd(&stdin_fd), STDIN_TOKEN, Ready::writable(), PollOpt::edge())?;
        poll.register(&EventedFd(&stdout_fd), STDOUT_TOKEN, Ready::readable(), PollOpt::edge())?;

        Ok(ChildProcess { child, poll, events: Events::with_capacity(8) })
    }

    /// Polls for readiness without blocking, returning the events observed this tick. Mirrors the
    /// teacher's `Endpoint::sync`: a zero-timeout poll drained into a small owned list rather than
    /// handed out as a borrowed iterator, so callers can push events onto their own queue.
    pub fn poll_events(&mut self) -> io::Result<Vec<ProcessEvent>> {
        self.poll.poll(&mut self.events, Some(Duration::from_secs(0)))?;
        let mut out = Vec::new();
        for event in self.events.iter() {
            let readiness = event.readiness();
            if event.token() == STDIN_TOKEN && readiness.is_writable() {
                out.push(ProcessEvent::Writable);
            }
            if event.token() == STDOUT_TOKEN && readiness.is_readable() {
                out.push(ProcessEvent::Readable);
            }
        }
        Ok(out)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.child.stdout.as_mut().expect("piped stdout").read(buf)
    }

    /// Terminates the helper and reaps it, per the orderly-teardown contract (`do_close`): no
    /// attempt is made to let it finish in-flight work, since by the time this is called the
    /// operation stack has already been unwound.
    pub fn kill(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Write for ChildProcess {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.child.stdin.as_mut().expect("piped stdin").write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.child.stdin.as_mut().expect("piped stdin").flush()
    }
}

fn set_nonblocking(fd: std::os::unix::io::RawFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(nix_to_io)?;
    let mut oflags = OFlag::from_bits_truncate(flags);
    oflags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(oflags)).map_err(nix_to_io)?;
    Ok(())
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}
