//! Physical links to the console.
//!
//! A [`Link`] is a byte stream with a settable read deadline that can be torn
//! down and reopened. The console talks 19200 baud 8N1 either directly on a
//! serial port or through a TCP serial bridge.

use log::{debug, info};
use snafu::{ResultExt, Snafu};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::str::FromStr;
use std::time::Duration;

/// Console line speed.
pub const DEFAULT_BAUD: u32 = 19200;

const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Error type for this module
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Failed to open serial port {path}: {source}"))]
    Open { path: String, source: io::Error },
    #[snafu(display("Failed to connect to {addr}: {source}"))]
    Connect { addr: String, source: io::Error },
    #[snafu(display("Invalid link '{spec}', expected tcp:HOST:PORT or serial:PATH[@BAUD]"))]
    InvalidSpec { spec: String },
    #[snafu(display("Serial links need the `serial` feature"))]
    SerialUnsupported,
}

/// Byte stream to the console.
pub trait Link: Read + Write + Send {
    /// Upper bound for the next blocking read. A read that times out fails
    /// with [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`].
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Close and reopen the connection, dropping any buffered data.
    fn reset(&mut self) -> io::Result<()>;

    /// Discard whatever the console sent that has not been read yet.
    fn clear_input(&mut self) -> io::Result<()>;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn reset(&mut self) -> io::Result<()> {
        (**self).reset()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

/// Console reached through a TCP serial bridge.
#[derive(Debug)]
pub struct TcpLink {
    addr: String,
    stream: TcpStream,
    timeout: Duration,
}

impl TcpLink {
    pub fn connect(addr: impl Into<String>) -> Result<Self, Error> {
        let addr = addr.into();
        let stream = Self::open_stream(&addr).context(ConnectSnafu { addr: &addr })?;
        info!("Connected to {}", addr);
        Ok(Self {
            addr,
            stream,
            timeout: Duration::from_secs(1),
        })
    }

    fn open_stream(addr: &str) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn drain(&mut self) -> io::Result<usize> {
        let mut buf = [0; 256];
        let mut dropped = 0;
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(dropped),
                Ok(n) => dropped += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(dropped),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Read for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Link for TcpLink {
    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout.max(MIN_TIMEOUT);
        self.stream.set_read_timeout(Some(self.timeout))
    }

    fn reset(&mut self) -> io::Result<()> {
        debug!("Reconnecting to {}", self.addr);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.stream = Self::open_stream(&self.addr)?;
        self.stream.set_read_timeout(Some(self.timeout))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.stream.set_nonblocking(true)?;
        let drained = self.drain();
        self.stream.set_nonblocking(false)?;
        let dropped = drained?;
        if dropped > 0 {
            debug!("Dropped {} stale bytes from {}", dropped, self.addr);
        }
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub use self::serial::SerialLink;

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

    /// Console on a local serial port, 8N1 without flow control.
    pub struct SerialLink {
        path: String,
        baud: u32,
        port: Option<Box<dyn SerialPort>>,
        timeout: Duration,
    }

    impl SerialLink {
        pub fn open(path: impl Into<String>, baud: u32) -> Result<Self, Error> {
            let path = path.into();
            let timeout = Duration::from_secs(1);
            let port = Self::open_port(&path, baud, timeout).context(OpenSnafu { path: &path })?;
            info!("Opened {} at {} baud", path, baud);
            Ok(Self {
                path,
                baud,
                port: Some(port),
                timeout,
            })
        }

        fn open_port(path: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn SerialPort>> {
            let port = serialport::new(path, baud)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(timeout)
                .open()?;
            port.clear(ClearBuffer::All)?;
            Ok(port)
        }

        fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
            self.port
                .as_mut()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
        }
    }

    impl std::fmt::Debug for SerialLink {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SerialLink")
                .field("path", &self.path)
                .field("baud", &self.baud)
                .field("open", &self.port.is_some())
                .finish()
        }
    }

    impl Read for SerialLink {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.port()?.read(buf)
        }
    }

    impl Write for SerialLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.port()?.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.port()?.flush()
        }
    }

    impl Link for SerialLink {
        fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
            self.timeout = timeout.max(MIN_TIMEOUT);
            let timeout = self.timeout;
            self.port()?.set_timeout(timeout).map_err(io::Error::from)
        }

        fn reset(&mut self) -> io::Result<()> {
            debug!("Reopening {}", self.path);
            // the old handle has to be closed before the device can be reopened
            self.port = None;
            self.port = Some(Self::open_port(&self.path, self.baud, self.timeout)?);
            Ok(())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.port()?
                .clear(ClearBuffer::Input)
                .map_err(io::Error::from)
        }
    }
}

/// Where to find the console, parsed from `tcp:HOST:PORT` or
/// `serial:PATH[@BAUD]`.
///
/// ```
/// use wxconsole_proto::LinkSpec;
///
/// let spec: LinkSpec = "serial:/dev/ttyUSB0".parse().unwrap();
/// assert_eq!(spec, LinkSpec::Serial { path: "/dev/ttyUSB0".into(), baud: 19200 });
/// assert!("udp:1.2.3.4:5".parse::<LinkSpec>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSpec {
    Tcp(String),
    Serial { path: String, baud: u32 },
}

impl FromStr for LinkSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSpecSnafu { spec: s }.build();
        match s.split_once(':') {
            Some(("tcp", addr)) if addr.contains(':') => Ok(LinkSpec::Tcp(addr.to_string())),
            Some(("serial", port)) if !port.is_empty() => match port.rsplit_once('@') {
                Some((path, baud)) => Ok(LinkSpec::Serial {
                    path: path.to_string(),
                    baud: baud.parse().map_err(|_| invalid())?,
                }),
                None => Ok(LinkSpec::Serial {
                    path: port.to_string(),
                    baud: DEFAULT_BAUD,
                }),
            },
            _ => Err(invalid()),
        }
    }
}

impl LinkSpec {
    pub fn open(&self) -> Result<Box<dyn Link>, Error> {
        match self {
            LinkSpec::Tcp(addr) => Ok(Box::new(TcpLink::connect(addr.as_str())?)),
            #[cfg(feature = "serial")]
            LinkSpec::Serial { path, baud } => Ok(Box::new(SerialLink::open(path.as_str(), *baud)?)),
            #[cfg(not(feature = "serial"))]
            LinkSpec::Serial { .. } => SerialUnsupportedSnafu.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_parse_spec() {
        assert_eq!(
            "tcp:10.0.0.5:22222".parse::<LinkSpec>().unwrap(),
            LinkSpec::Tcp("10.0.0.5:22222".into())
        );
        assert_eq!(
            "serial:/dev/ttyS1@9600".parse::<LinkSpec>().unwrap(),
            LinkSpec::Serial {
                path: "/dev/ttyS1".into(),
                baud: 9600
            }
        );
        for bad in ["tcp:host", "serial:", "serial:/dev/x@fast", "/dev/ttyS0", ""] {
            assert!(
                matches!(bad.parse::<LinkSpec>(), Err(Error::InvalidSpec { .. })),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_tcp_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let spec: LinkSpec = format!("tcp:{}", addr).parse().unwrap();
        let mut link = spec.open().unwrap();

        let (mut peer, _) = listener.accept().unwrap();
        link.write_all(b"\n").unwrap();
        let mut buf = [0; 1];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"\n");

        link.set_read_timeout(Duration::from_millis(20)).unwrap();
        let err = link.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ));

        link.reset().unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.write_all(b"\n\r").unwrap();
        let mut buf = [0; 2];
        link.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"\n\r");
    }

    #[test]
    fn test_tcp_clear_input() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut link = TcpLink::connect(listener.local_addr().unwrap().to_string()).unwrap();
        link.set_read_timeout(Duration::from_millis(200)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        peer.write_all(b"\n\r").unwrap();
        // let the stale bytes land in the socket buffer
        std::thread::sleep(Duration::from_millis(50));
        link.clear_input().unwrap();

        peer.write_all(b"OK").unwrap();
        let mut buf = [0; 2];
        link.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"OK");

        // nothing pending, the link stays blocking afterwards
        link.clear_input().unwrap();
        link.set_read_timeout(Duration::from_millis(20)).unwrap();
        let err = link.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ));
    }

    #[test]
    fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(matches!(
            TcpLink::connect(addr),
            Err(Error::Connect { .. })
        ));
    }
}
