//! Frame pipeline between a `Frame` and the socket.
//!
//! ## Frame Format
//!
//! ```text
//! +----------------+--------------+--------------------------------+
//! | Length (4B BE) | Version (1B) | AES-GCM(deflate(CBOR(Frame)))  |
//! +----------------+--------------+--------------------------------+
//! ```
//!
//! The length counts every byte after the length prefix. The version is
//! checked before anything is decrypted.

use crate::crypto::FrameCipher;
use crate::error::{CloudError, CloudResult};
use cloudsync_protocol::{Frame, PROTOCOL_VERSION};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Compresses and encrypts a frame into its wire body (version byte excluded).
pub(crate) fn seal_frame(frame: &Frame, cipher: &mut FrameCipher) -> CloudResult<Vec<u8>> {
    let encoded = frame.encode()?;
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(encoded.len()), Compression::fast());
    encoder.write_all(&encoded)?;
    let compressed = encoder.finish()?;
    cipher.seal(&compressed)
}

/// Decrypts and decompresses a wire body back into a frame.
pub(crate) fn open_frame(
    body: &[u8],
    cipher: &mut FrameCipher,
    max_size: usize,
) -> CloudResult<Frame> {
    let compressed = cipher.open(body)?;
    let mut decoded = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(max_size as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(|e| CloudError::transmission(format!("frame failed to inflate: {e}")))?;
    if decoded.len() > max_size {
        return Err(CloudError::transmission("inflated frame exceeds size limit"));
    }
    Frame::decode(&decoded)
        .map_err(|e| CloudError::transmission(format!("frame failed to decode: {e}")))
}

/// Writes one frame and flushes.
pub(crate) async fn write_frame<W>(
    writer: &mut W,
    frame: &Frame,
    cipher: &mut FrameCipher,
) -> CloudResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = seal_frame(frame, cipher)?;
    let length = u32::try_from(body.len() + 1)
        .map_err(|_| CloudError::transmission("frame too large to send"))?;

    let mut buf = Vec::with_capacity(body.len() + 5);
    buf.extend_from_slice(&length.to_be_bytes());
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&body);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
/// The cipher is locked only while the body is decrypted.
pub(crate) async fn read_frame<R>(
    reader: &mut R,
    cipher: &Mutex<FrameCipher>,
    max_size: usize,
) -> CloudResult<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];
    let first = reader.read(&mut length_bytes[..1]).await?;
    if first == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut length_bytes[1..]).await?;
    let length = u32::from_be_bytes(length_bytes) as usize;

    if length < 2 || length > max_size + 1 {
        return Err(CloudError::transmission(format!(
            "garbled frame length: {length} bytes"
        )));
    }

    let version = reader.read_u8().await?;
    if version != PROTOCOL_VERSION {
        return Err(CloudError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote: version,
        });
    }

    let mut body = vec![0u8; length - 1];
    reader.read_exact(&mut body).await?;

    let mut cipher = cipher.lock();
    open_frame(&body, &mut cipher, max_size).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Direction;
    use cloudsync_protocol::{Message, NodeData, Properties, MAX_FRAME_SIZE};

    fn ciphers() -> (FrameCipher, Mutex<FrameCipher>) {
        (
            FrameCipher::bootstrap(Direction::ClientToServer).unwrap(),
            Mutex::new(FrameCipher::bootstrap(Direction::ClientToServer).unwrap()),
        )
    }

    #[tokio::test]
    async fn frames_roundtrip_over_stream() {
        let (mut out_cipher, in_cipher) = ciphers();
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let first = Frame::new(1, Message::Begin);
        let second = Frame::new(
            2,
            Message::NodeData(NodeData::new("n1", "Item", Properties::new())),
        );
        write_frame(&mut client, &first, &mut out_cipher).await.unwrap();
        write_frame(&mut client, &second, &mut out_cipher).await.unwrap();
        drop(client);

        let got = read_frame(&mut server, &in_cipher, MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(got, Some(first));
        let got = read_frame(&mut server, &in_cipher, MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(got, Some(second));
        let got = read_frame(&mut server, &in_cipher, MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn version_checked_first() {
        let (_, in_cipher) = ciphers();
        let (mut client, mut server) = tokio::io::duplex(1024);

        // Body is garbage: the version check must fail before decryption.
        let mut bytes = 5u32.to_be_bytes().to_vec();
        bytes.push(PROTOCOL_VERSION + 1);
        bytes.extend_from_slice(&[0xAA; 4]);
        client.write_all(&bytes).await.unwrap();

        let err = read_frame(&mut server, &in_cipher, MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CloudError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: PROTOCOL_VERSION + 1
            }
        );
    }

    #[tokio::test]
    async fn oversized_length_is_garbled() {
        let (_, in_cipher) = ciphers();
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, &in_cipher, 1024).await.unwrap_err();
        assert!(matches!(err, CloudError::Transmission(_)));
    }

    #[tokio::test]
    async fn truncated_body_is_transmission_error() {
        let (_, in_cipher) = ciphers();
        let (mut client, mut server) = tokio::io::duplex(1024);
        let mut bytes = 100u32.to_be_bytes().to_vec();
        bytes.push(PROTOCOL_VERSION);
        bytes.extend_from_slice(&[1, 2, 3]);
        client.write_all(&bytes).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, &in_cipher, MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Transmission(_)));
    }

    #[tokio::test]
    async fn wrong_key_fails_authentication() {
        let mut out_cipher = FrameCipher::bootstrap(Direction::ClientToServer).unwrap();
        out_cipher
            .rekey(&crate::crypto::SessionKey::derive("other", 256).unwrap())
            .unwrap();
        let in_cipher = Mutex::new(FrameCipher::bootstrap(Direction::ClientToServer).unwrap());
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &Frame::new(1, Message::End), &mut out_cipher)
            .await
            .unwrap();
        let err = read_frame(&mut server, &in_cipher, MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AuthenticationFailed(_)));
    }
}
