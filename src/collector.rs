//! Collector - single-threaded multiplexing loop over worker connections
//!
//! The collector owns one listening socket. After the bootstrap handshake
//! it waits with `poll(2)` for readability on the listener and on every
//! accepted worker connection. Each ready connection gets exactly one
//! `read` per wakeup, so a slow worker never stalls the others; complete
//! frames are decoded, printed, and acknowledged.
//!
//! The loop ends once every worker has sent its termination frame.

use crate::error::{CollectorError, TransportError};
use crate::handshake::{receive_worker_count, ReadyNotifier};
use crate::protocol::{write_ack, FrameDecoder, Message};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use tracing::{debug, info, trace, warn};

/// Bytes requested from a connection per readiness event
const READ_CHUNK: usize = 4096;

/// Column header written before any result line
pub const HEADER: &str = "n\tavg\tstd\tfile";

/// Result of a finished collector loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorSummary {
    /// Worker count received in the handoff
    pub workers: usize,

    /// Result lines emitted
    pub records: u64,

    /// Sum of the per-file value counts
    pub values: u64,

    /// Termination frames received
    pub ended: usize,
}

/// An accepted worker connection
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    decoder: FrameDecoder,
    records: u64,
}

/// What servicing a ready connection left behind
enum PeerState {
    Open,
    Ended,
}

/// Which descriptors `poll` reported
struct Readiness {
    listener: bool,
    peers: Vec<bool>,
}

/// The result-collecting endpoint
pub struct Collector {
    listener: TcpListener,
}

impl Collector {
    /// Bind the listening endpoint
    pub fn bind(addr: SocketAddr) -> Result<Self, CollectorError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| CollectorError::Bind { addr, source })?;
        Ok(Self { listener })
    }

    /// Address actually bound (differs from the request when port 0 was asked for)
    pub fn local_addr(&self) -> Result<SocketAddr, CollectorError> {
        self.listener.local_addr().map_err(CollectorError::Accept)
    }

    /// Run the whole collector side of a run
    ///
    /// Announces readiness, reads the worker count from the handoff
    /// connection, then multiplexes worker connections until every worker
    /// has terminated. Results go to `out`, one line each, after a header.
    pub fn serve<N, W>(self, notifier: N, out: W) -> Result<CollectorSummary, CollectorError>
    where
        N: ReadyNotifier,
        W: Write,
    {
        let addr = self.local_addr()?;
        notifier.notify(addr)?;
        info!(%addr, "Collector listening");

        let workers = receive_worker_count(&self.listener)? as usize;
        self.multiplex(workers, out)
    }

    /// The multiplexing loop proper
    fn multiplex<W: Write>(
        self,
        workers: usize,
        mut out: W,
    ) -> Result<CollectorSummary, CollectorError> {
        write_header(&mut out).map_err(CollectorError::Output)?;

        let mut summary = CollectorSummary {
            workers,
            ..Default::default()
        };
        let mut peers: Vec<Peer> = Vec::with_capacity(workers);
        let mut chunk = [0u8; READ_CHUNK];

        while summary.ended < workers {
            let ready = self.wait_readable(&peers)?;

            // Walk backwards so removals leave lower indices untouched
            for idx in (0..ready.peers.len()).rev() {
                if !ready.peers[idx] {
                    continue;
                }
                match service(&mut peers[idx], &mut chunk, &mut out, &mut summary)? {
                    PeerState::Open => {}
                    PeerState::Ended => {
                        let peer = peers.remove(idx);
                        summary.ended += 1;
                        debug!(
                            peer = %peer.addr,
                            records = peer.records,
                            ended = summary.ended,
                            workers,
                            "Worker terminated"
                        );
                    }
                }
            }

            if ready.listener {
                let (stream, addr) = self.listener.accept().map_err(CollectorError::Accept)?;
                debug!(peer = %addr, "Worker connected");
                peers.push(Peer {
                    stream,
                    addr,
                    decoder: FrameDecoder::new(),
                    records: 0,
                });
            }
        }

        if !peers.is_empty() {
            warn!(open = peers.len(), "Closing connections that never terminated");
        }
        out.flush().map_err(CollectorError::Output)?;

        info!(
            records = summary.records,
            workers = summary.ended,
            "Collector finished"
        );
        Ok(summary)
    }

    /// Block until the listener or some peer is readable
    fn wait_readable(&self, peers: &[Peer]) -> Result<Readiness, CollectorError> {
        let mut fds = Vec::with_capacity(peers.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        fds.extend(
            peers
                .iter()
                .map(|peer| PollFd::new(peer.stream.as_fd(), PollFlags::POLLIN)),
        );

        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CollectorError::Poll(e)),
            }
        }

        Ok(Readiness {
            listener: fired(&fds[0]),
            peers: fds[1..].iter().map(fired).collect(),
        })
    }
}

fn fired(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| {
        events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Write the column header and rule
pub fn write_header<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "{HEADER}")?;
    writeln!(out, "{}", "-".repeat(74))?;
    out.flush()
}

/// Read once from a ready peer and handle every complete frame
fn service<W: Write>(
    peer: &mut Peer,
    chunk: &mut [u8],
    out: &mut W,
    summary: &mut CollectorSummary,
) -> Result<PeerState, CollectorError> {
    let fail = |addr: SocketAddr, source: TransportError| CollectorError::Peer { peer: addr, source };

    let n = loop {
        match peer.stream.read(chunk) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(fail(peer.addr, TransportError::Receive(e))),
        }
    };
    if n == 0 {
        return Err(fail(peer.addr, TransportError::Closed));
    }
    peer.decoder.extend(&chunk[..n]);

    while let Some(message) = peer
        .decoder
        .next_message()
        .map_err(|e| fail(peer.addr, e.into()))?
    {
        match message {
            Message::Record(record) => {
                trace!(peer = %peer.addr, path = %record.path, "Result received");
                writeln!(out, "{record}")
                    .and_then(|()| out.flush())
                    .map_err(CollectorError::Output)?;
                write_ack(&mut peer.stream).map_err(|e| fail(peer.addr, TransportError::Send(e)))?;
                peer.records += 1;
                summary.records += 1;
                summary.values += record.count;
            }
            Message::Ended => {
                write_ack(&mut peer.stream).map_err(|e| fail(peer.addr, TransportError::Send(e)))?;
                if peer.decoder.pending() > 0 {
                    warn!(
                        peer = %peer.addr,
                        bytes = peer.decoder.pending(),
                        "Discarding data after termination"
                    );
                }
                return Ok(PeerState::Ended);
            }
        }
    }

    Ok(PeerState::Open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{channel_readiness, send_worker_count, ReadyWaiter};
    use crate::protocol::CollectorLink;
    use crate::stats::ResultRecord;
    use std::thread::{self, JoinHandle};

    type Served = JoinHandle<Result<(CollectorSummary, Vec<u8>), CollectorError>>;

    fn start(workers: u32) -> (SocketAddr, Served) {
        let (notifier, waiter) = channel_readiness();
        let handle: Served = thread::spawn(move || {
            let collector = Collector::bind("127.0.0.1:0".parse().unwrap())?;
            let mut out = Vec::new();
            let summary = collector.serve(notifier, &mut out)?;
            Ok((summary, out))
        });
        let addr = waiter.wait().unwrap();
        send_worker_count(addr, workers).unwrap();
        (addr, handle)
    }

    fn record(count: u64, path: &str) -> Message {
        Message::Record(ResultRecord {
            count,
            mean: 1.0,
            std_dev: 0.0,
            path: path.to_string(),
        })
    }

    fn lines(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .skip(2)
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_collects_until_all_workers_end() {
        let (addr, handle) = start(2);

        let mut first = CollectorLink::connect(addr).unwrap();
        let mut second = CollectorLink::connect(addr).unwrap();
        first.deliver(&record(3, "a.dat")).unwrap();
        second.deliver(&record(2, "b.dat")).unwrap();
        first.deliver(&record(1, "c.dat")).unwrap();
        second.deliver(&Message::Ended).unwrap();
        first.deliver(&Message::Ended).unwrap();

        let (summary, out) = handle.join().unwrap().unwrap();
        assert_eq!(summary.workers, 2);
        assert_eq!(summary.ended, 2);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.values, 6);

        let text = String::from_utf8(out.clone()).unwrap();
        assert!(text.starts_with(HEADER));
        assert_eq!(
            lines(&out),
            vec![
                "3\t1.00\t0.00\ta.dat",
                "2\t1.00\t0.00\tb.dat",
                "1\t1.00\t0.00\tc.dat"
            ]
        );
    }

    #[test]
    fn test_workers_that_only_terminate() {
        let (addr, handle) = start(3);

        let workers: Vec<_> = (0..3)
            .map(|_| {
                thread::spawn(move || {
                    let mut link = CollectorLink::connect(addr).unwrap();
                    link.deliver(&Message::Ended).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let (summary, out) = handle.join().unwrap().unwrap();
        assert_eq!(summary.ended, 3);
        assert_eq!(summary.records, 0);
        assert!(lines(&out).is_empty());
    }

    #[test]
    fn test_per_worker_order_is_preserved() {
        const WORKERS: u32 = 4;
        const PER_WORKER: usize = 25;
        let (addr, handle) = start(WORKERS);

        let workers: Vec<_> = (0..WORKERS)
            .map(|w| {
                thread::spawn(move || {
                    let mut link = CollectorLink::connect(addr).unwrap();
                    for i in 0..PER_WORKER {
                        link.deliver(&record(i as u64, &format!("w{w}/{i:03}.dat")))
                            .unwrap();
                    }
                    link.deliver(&Message::Ended).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let (summary, out) = handle.join().unwrap().unwrap();
        assert_eq!(summary.records, (WORKERS as usize * PER_WORKER) as u64);

        let lines = lines(&out);
        for w in 0..WORKERS {
            let prefix = format!("w{w}/");
            let paths: Vec<&str> = lines
                .iter()
                .filter_map(|l| l.rsplit('\t').next())
                .filter(|p| p.starts_with(&prefix))
                .collect();
            assert_eq!(paths.len(), PER_WORKER);
            assert!(paths.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }

    #[test]
    fn test_disconnect_without_termination_is_fatal() {
        let (addr, handle) = start(1);

        let mut link = CollectorLink::connect(addr).unwrap();
        link.deliver(&record(1, "a.dat")).unwrap();
        drop(link);

        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            CollectorError::Peer {
                source: TransportError::Closed,
                ..
            }
        ));
    }
}
