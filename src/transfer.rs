//! Image transfer over a one-shot TCP connection.
//!
//! The sender listens on an ephemeral port and announces it with an `IMG`
//! datagram; the receiver connects and reads exactly the announced number
//! of bytes.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::observability::{IMAGE_BYTES, TRANSFER_DURATION, TRANSFER_ERRORS};

/// Largest image accepted in either direction.
pub const MAX_IMAGE_BYTES: u64 = 16 * 1024 * 1024;

/// How long a sender waits for the receiver to connect.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a receiver waits for the whole image.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Binds an ephemeral listener and serves `data` to the first connection.
///
/// Returns the bound port and the task serving the data.
pub async fn serve_once(data: Bytes, accept_timeout: Duration) -> Result<(u16, JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .map_err(|err| Error::io("failed to bind image listener", err))?;
    let port = listener.local_addr()?.port();
    let handle = tokio::spawn(async move {
        let result = serve(listener, data, accept_timeout).await;
        if let Err(err) = &result {
            TRANSFER_ERRORS.click();
            tracing::warn!("image upload failed: {err}");
        }
        result
    });
    Ok((port, handle))
}

async fn serve(listener: TcpListener, data: Bytes, accept_timeout: Duration) -> Result<()> {
    let (mut stream, peer) = tokio::time::timeout(accept_timeout, listener.accept())
        .await
        .map_err(|_| {
            Error::timeout(
                "receiver never connected",
                Some(accept_timeout.as_secs_f64()),
            )
        })??;
    tracing::debug!("serving {} image bytes to {peer}", data.len());
    stream.write_all(&data).await?;
    stream.shutdown().await?;
    IMAGE_BYTES.count(data.len() as u64);
    Ok(())
}

/// Connects to `addr` and reads exactly `size` bytes.
pub async fn fetch(addr: SocketAddr, size: u64, timeout: Duration) -> Result<Bytes> {
    if size > MAX_IMAGE_BYTES {
        return Err(Error::transfer(
            format!("image exceeds {MAX_IMAGE_BYTES} bytes"),
            Some(size),
            None,
        ));
    }
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, read_exact(addr, size))
        .await
        .map_err(|_| Error::timeout("image download stalled", Some(timeout.as_secs_f64())))
        .and_then(|inner| inner);
    match &result {
        Ok(bytes) => {
            IMAGE_BYTES.count(bytes.len() as u64);
            TRANSFER_DURATION.add(start.elapsed().as_secs_f64());
        }
        Err(_) => TRANSFER_ERRORS.click(),
    }
    result
}

async fn read_exact(addr: SocketAddr, size: u64) -> Result<Bytes> {
    let mut stream = TcpStream::connect(addr).await.map_err(|err| {
        Error::connection(
            format!("cannot reach image sender at {addr}"),
            Some(Box::new(err)),
        )
    })?;
    let mut buf = BytesMut::with_capacity(size as usize);
    while (buf.len() as u64) < size {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::transfer(
                "sender closed the connection early",
                Some(size),
                Some(buf.len() as u64),
            ));
        }
    }
    buf.truncate(size as usize);
    Ok(buf.freeze())
}

/// Guesses a file extension from the leading magic bytes.
pub fn sniff_extension(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [0xff, 0xd8, 0xff, ..] => "jpg",
        [b'G', b'I', b'F', b'8', ..] => "gif",
        [b'B', b'M', ..] => "bmp",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "webp",
        _ => "bin",
    }
}

/// Writes a received image into `dir` as `<from>_<unix-millis>.<ext>`.
pub async fn store_image(dir: &Path, from: &str, data: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|err| Error::io(format!("cannot create {}", dir.display()), err))?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let path = dir.join(format!("{from}_{millis}.{}", sniff_extension(data)));
    tokio::fs::write(&path, data)
        .await
        .map_err(|err| Error::io(format!("cannot write {}", path.display()), err))?;
    Ok(path)
}

/// Reads an image for sending, enforcing [`MAX_IMAGE_BYTES`].
pub async fn load_image(path: &Path) -> Result<Bytes> {
    let metadata = tokio::fs::metadata(path).await.map_err(|_| {
        Error::not_found(
            "file not found",
            Some("file".to_string()),
            Some(path.display().to_string()),
        )
    })?;
    if !metadata.is_file() {
        return Err(Error::validation(
            format!("{} is not a file", path.display()),
            Some("path".to_string()),
        ));
    }
    if metadata.len() > MAX_IMAGE_BYTES {
        return Err(Error::transfer(
            format!("image exceeds {MAX_IMAGE_BYTES} bytes"),
            Some(metadata.len()),
            None,
        ));
    }
    let data = tokio::fs::read(path)
        .await
        .map_err(|err| Error::io(format!("cannot read {}", path.display()), err))?;
    Ok(Bytes::from(data))
}
