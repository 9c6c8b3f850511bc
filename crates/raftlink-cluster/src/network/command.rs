//! Newline-delimited command protocol spoken on peer streams.
//!
//! The dialing side writes [`HANDSHAKE_LINE`] and waits for one reply line.
//! The accepting side reads lines until the stream ends and answers every
//! line with [`ACK_LINE`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::ClusterError;

/// Line a dialer sends right after opening its stream.
pub const HANDSHAKE_LINE: &str = "connect\n";

/// Line the accepting side writes for every command it receives.
pub const ACK_LINE: &str = "ack\n";

/// Longest command line accepted, excluding the terminator.
pub const MAX_COMMAND_LEN: usize = 64 * 1024;

/// A command observed on an inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    /// Address of the session the command arrived on.
    pub remote: SocketAddr,
    /// The command without its line terminator.
    pub line: String,
}

/// Sender that receives every command read by a [`CommandChannel`].
pub type CommandSink = UnboundedSender<ReceivedCommand>;

/// Reads commands from one inbound stream and acknowledges each of them.
pub struct CommandChannel<R, W> {
    reader: R,
    writer: W,
    remote: SocketAddr,
    sink: Option<CommandSink>,
    received: u64,
}

impl<R, W> CommandChannel<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Create a channel over the two halves of a stream.
    pub fn new(reader: R, writer: W, remote: SocketAddr) -> Self {
        Self {
            reader,
            writer,
            remote,
            sink: None,
            received: 0,
        }
    }

    /// Forward received commands to `sink` as well as the log.
    pub fn with_sink(mut self, sink: Option<CommandSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Number of commands read so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Read commands until the stream ends.
    ///
    /// Only returns once the stream has ended, with the error that ended it.
    /// A clean close by the peer is [`ClusterError::StreamClosed`]. Lines that
    /// are not valid UTF-8 are logged lossily and still acknowledged.
    pub async fn serve(&mut self) -> Result<Infallible, ClusterError> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = read_line_bounded(&mut self.reader, &mut buf)
                .await
                .map_err(|e| ClusterError::SessionStream(e.to_string()))?;
            if read == 0 {
                return Err(ClusterError::StreamClosed);
            }

            let line = String::from_utf8_lossy(&buf);
            let command = trim_line(&line);
            self.received += 1;
            tracing::info!(remote = %self.remote, command, "received command");

            if let Some(sink) = &self.sink {
                let _ = sink.send(ReceivedCommand {
                    remote: self.remote,
                    line: command.to_string(),
                });
            }

            self.acknowledge()
                .await
                .map_err(|e| ClusterError::SessionStream(format!("failed to acknowledge: {}", e)))?;
        }
    }

    async fn acknowledge(&mut self) -> std::io::Result<()> {
        self.writer.write_all(ACK_LINE.as_bytes()).await?;
        self.writer.flush().await
    }
}

/// Send the handshake line and wait for the peer's reply.
pub async fn perform_handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    timeout: Duration,
) -> Result<String, ClusterError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    exchange_line(reader, writer, HANDSHAKE_LINE, timeout).await
}

/// Write one line, flush, and read one reply line within `timeout`.
///
/// A missing terminator on `line` is added. The reply is returned without
/// its terminator.
pub async fn exchange_line<R, W>(
    reader: &mut R,
    writer: &mut W,
    line: &str,
    timeout: Duration,
) -> Result<String, ClusterError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ClusterError::HandshakeIo(format!("write failed: {}", e)))?;
    if !line.ends_with('\n') {
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| ClusterError::HandshakeIo(format!("write failed: {}", e)))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| ClusterError::HandshakeIo(format!("flush failed: {}", e)))?;

    let mut reply = Vec::new();
    let read = tokio::time::timeout(timeout, read_line_bounded(reader, &mut reply))
        .await
        .map_err(|_| ClusterError::HandshakeTimeout(timeout))?
        .map_err(|e| ClusterError::HandshakeIo(format!("read failed: {}", e)))?;

    if read == 0 {
        return Err(ClusterError::HandshakeIo(
            "stream closed before a reply was received".to_string(),
        ));
    }

    Ok(trim_line(&String::from_utf8_lossy(&reply)).to_string())
}

/// Read one line of at most [`MAX_COMMAND_LEN`] bytes plus terminator into `buf`.
async fn read_line_bounded<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let limit = (MAX_COMMAND_LEN + 2) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read as u64 == limit && buf.last() != Some(&b'\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("command exceeds {} bytes", MAX_COMMAND_LEN),
        ));
    }
    Ok(read)
}

fn trim_line(line: &str) -> &str {
    line.trim_end_matches('\n').trim_end_matches('\r')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncReadExt, BufReader};
    use tokio::sync::mpsc::unbounded_channel;

    fn remote() -> SocketAddr {
        "10.1.2.3:4567".parse().unwrap()
    }

    #[tokio::test]
    async fn test_commands_are_observed_in_order() {
        let (mut client, server) = duplex(1024);
        let (server_read, server_write) = split(server);
        let (tx, mut rx) = unbounded_channel();

        let mut channel =
            CommandChannel::new(BufReader::new(server_read), server_write, remote())
                .with_sink(Some(tx));

        client.write_all(b"ping\nstatus\nbye\n").await.unwrap();
        client.shutdown().await.unwrap();

        let err = channel.serve().await.unwrap_err();
        assert!(err.is_stream_closed());
        assert_eq!(channel.received(), 3);

        let mut seen = Vec::new();
        while let Ok(command) = rx.try_recv() {
            assert_eq!(command.remote, remote());
            seen.push(command.line);
        }
        assert_eq!(seen, vec!["ping", "status", "bye"]);

        drop(channel);
        let mut acks = String::new();
        client.read_to_string(&mut acks).await.unwrap();
        assert_eq!(acks, "ack\nack\nack\n");
    }

    #[tokio::test]
    async fn test_crlf_terminators_are_trimmed() {
        let (mut client, server) = duplex(256);
        let (server_read, server_write) = split(server);
        let (tx, mut rx) = unbounded_channel();
        let mut channel =
            CommandChannel::new(BufReader::new(server_read), server_write, remote())
                .with_sink(Some(tx));

        client.write_all(b"status\r\n").await.unwrap();
        client.shutdown().await.unwrap();
        assert!(channel.serve().await.unwrap_err().is_stream_closed());

        assert_eq!(rx.try_recv().unwrap().line, "status");
    }

    #[tokio::test]
    async fn test_oversized_command_is_a_stream_error() {
        let (mut client, server) = duplex(256 * 1024);
        let (server_read, server_write) = split(server);
        let mut channel = CommandChannel::new(BufReader::new(server_read), server_write, remote());

        let long = vec![b'x'; MAX_COMMAND_LEN + 10];
        client.write_all(&long).await.unwrap();
        client.shutdown().await.unwrap();

        let err = channel.serve().await.unwrap_err();
        assert!(matches!(err, ClusterError::SessionStream(_)));
        assert_eq!(channel.received(), 0);
    }

    #[tokio::test]
    async fn test_handshake_against_acknowledging_peer() {
        let (client, server) = duplex(256);
        let (server_read, server_write) = split(server);
        let mut channel = CommandChannel::new(BufReader::new(server_read), server_write, remote());
        let server_task = tokio::spawn(async move { channel.serve().await });

        let (client_read, mut client_write) = split(client);
        let mut client_read = BufReader::new(client_read);
        let reply = perform_handshake(&mut client_read, &mut client_write, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(reply, "ack");

        client_write.shutdown().await.unwrap();
        assert!(server_task.await.unwrap().unwrap_err().is_stream_closed());
    }

    #[tokio::test]
    async fn test_handshake_times_out_against_silent_peer() {
        let (client, _server) = duplex(256);
        let (client_read, mut client_write) = split(client);
        let mut client_read = BufReader::new(client_read);

        let started = std::time::Instant::now();
        let result =
            perform_handshake(&mut client_read, &mut client_write, Duration::from_millis(100)).await;

        assert!(matches!(result, Err(ClusterError::HandshakeTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_handshake_reports_closed_stream() {
        let (client, server) = duplex(256);
        drop(server);
        let (client_read, mut client_write) = split(client);
        let mut client_read = BufReader::new(client_read);

        let result =
            perform_handshake(&mut client_read, &mut client_write, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClusterError::HandshakeIo(_))));
    }

    #[tokio::test]
    async fn test_exchange_line_appends_terminator() {
        let (client, server) = duplex(256);
        let (server_read, server_write) = split(server);
        let (tx, mut rx) = unbounded_channel();
        let mut channel = CommandChannel::new(BufReader::new(server_read), server_write, remote())
            .with_sink(Some(tx));
        tokio::spawn(async move { channel.serve().await });

        let (client_read, mut client_write) = split(client);
        let mut client_read = BufReader::new(client_read);
        let reply = exchange_line(
            &mut client_read,
            &mut client_write,
            "hello world",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(reply, "ack");
        assert_eq!(rx.recv().await.unwrap().line, "hello world");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_acknowledged() {
        let (mut client, server) = duplex(256);
        let (server_read, server_write) = split(server);
        let (tx, mut rx) = unbounded_channel();
        let mut channel =
            CommandChannel::new(BufReader::new(server_read), server_write, remote())
                .with_sink(Some(tx));

        client.write_all(b"st\xffatus\nping\n").await.unwrap();
        client.shutdown().await.unwrap();

        assert!(channel.serve().await.unwrap_err().is_stream_closed());
        assert_eq!(channel.received(), 2);
        assert_eq!(rx.try_recv().unwrap().line, "st\u{fffd}atus");
        assert_eq!(rx.try_recv().unwrap().line, "ping");

        drop(channel);
        let mut acks = String::new();
        client.read_to_string(&mut acks).await.unwrap();
        assert_eq!(acks, "ack\nack\n");
    }
}
