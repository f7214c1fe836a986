//! Background packet reader.

use std::io;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info};

use crate::error::ProtocolError;

/// Blocking source of decoded packets, typically a codec over a socket.
pub trait PacketSource<P>: Send {
    /// Next packet, `Ok(None)` on orderly close.
    fn next_packet(&mut self) -> Result<Option<P>, ProtocolError>;
}

/// Receiving ends handed to the scheduler.
pub struct NetworkLink<P> {
    pub packets: Receiver<P>,
    pub errors: Receiver<ProtocolError>,
}

/// Run `source` on a thread named `network-reader`.
///
/// Packets are forwarded in arrival order on an unbounded channel. The first
/// error is forwarded on the error channel and ends the thread. The thread
/// also exits once the scheduler drops the packet receiver.
pub fn spawn_reader<P, S>(mut source: S) -> io::Result<(NetworkLink<P>, JoinHandle<()>)>
where
    P: Send + 'static,
    S: PacketSource<P> + 'static,
{
    let (packet_tx, packet_rx) = crossbeam_channel::unbounded::<P>();
    let (error_tx, error_rx) = crossbeam_channel::bounded::<ProtocolError>(1);

    let handle = std::thread::Builder::new()
        .name("network-reader".into())
        .spawn(move || read_loop(&mut source, &packet_tx, &error_tx))?;

    Ok((
        NetworkLink {
            packets: packet_rx,
            errors: error_rx,
        },
        handle,
    ))
}

fn read_loop<P, S: PacketSource<P>>(
    source: &mut S,
    packets: &Sender<P>,
    errors: &Sender<ProtocolError>,
) {
    loop {
        match source.next_packet() {
            Ok(Some(packet)) => {
                if packets.send(packet).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("packet stream closed");
                break;
            }
            Err(err) => {
                error!(%err, "protocol error, stopping reader");
                let _ = errors.send(err);
                break;
            }
        }
    }
}

/// [`PacketSource`] backed by an in-memory channel of decode results.
///
/// Used by tests and by the headless driver to inject packets without a
/// socket. The stream closes when every sender is dropped.
pub struct ChannelSource<P> {
    rx: Receiver<Result<P, ProtocolError>>,
}

impl<P> ChannelSource<P> {
    pub fn new(rx: Receiver<Result<P, ProtocolError>>) -> Self {
        Self { rx }
    }

    /// A source plus the sender that feeds it.
    pub fn pair() -> (Sender<Result<P, ProtocolError>>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(rx))
    }
}

impl<P: Send> PacketSource<P> for ChannelSource<P> {
    fn next_packet(&mut self) -> Result<Option<P>, ProtocolError> {
        match self.rx.recv() {
            Ok(Ok(packet)) => Ok(Some(packet)),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(None),
        }
    }
}
