use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream, ReadBuf},
    net::TcpStream,
};

use crate::{client::options::ServerAddress, error::Result, runtime};

const KEEPALIVE_TIME: Duration = Duration::from_secs(120);

/// The stream a [`Connection`](crate::cmap::Connection) reads and writes. In tests an
/// in-memory duplex pipe stands in for the server socket.
#[derive(Debug)]
pub(crate) enum AsyncStream {
    Tcp(BufStream<TcpStream>),
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

impl AsyncStream {
    /// Opens a TCP stream to `address`, bounded by `connect_timeout` when one is given.
    pub(crate) async fn connect(
        address: &ServerAddress,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let stream = runtime::timeout(
            connect_timeout,
            TcpStream::connect((address.host(), address.port())),
        )
        .await??;
        stream.set_nodelay(true)?;

        #[cfg(not(wasi))]
        let stream = {
            let socket = socket2::Socket::from(stream.into_std()?);
            let conf = socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME);
            socket.set_tcp_keepalive(&conf)?;
            TcpStream::from_std(socket.into())?
        };

        Ok(Self::Tcp(BufStream::new(stream)))
    }
}

impl AsyncRead for AsyncStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(test)]
            Self::Mock(ref mut stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AsyncStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(test)]
            Self::Mock(ref mut stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(test)]
            Self::Mock(ref mut stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(test)]
            Self::Mock(ref mut stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
