//! Extension points for layers above the transport.

use bytes::Bytes;

use super::error::TransformError;

/// Transform applied to logical packet payloads.
///
/// The transport itself carries plaintext. A secure channel plugs in here:
/// `seal` runs on every logical packet before fragmentation and `open` on
/// every reassembled packet before it is delivered. Raw pipe payloads go
/// through the same pair only when `transform_raw` is enabled.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use udptun::core::{PayloadTransform, TransformError};
///
/// /// Toy transform that flips every bit.
/// struct Invert;
///
/// impl PayloadTransform for Invert {
///     fn seal(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
///         Ok(payload.iter().map(|b| !b).collect())
///     }
///
///     fn open(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
///         Ok(payload.iter().map(|b| !b).collect())
///     }
/// }
///
/// let mut t = Invert;
/// let sealed = t.seal(Bytes::from_static(b"abc")).unwrap();
/// assert_eq!(t.open(sealed).unwrap(), Bytes::from_static(b"abc"));
/// ```
pub trait PayloadTransform: Send + 'static {
    /// Transform an outbound payload.
    fn seal(&mut self, payload: Bytes) -> Result<Bytes, TransformError>;

    /// Reverse [`seal`](Self::seal) on an inbound payload.
    ///
    /// An error drops the payload and counts as a protocol violation.
    fn open(&mut self, payload: Bytes) -> Result<Bytes, TransformError>;
}

/// Identity transform; payloads travel as plaintext.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl PayloadTransform for Plaintext {
    fn seal(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
        Ok(payload)
    }

    fn open(&mut self, payload: Bytes) -> Result<Bytes, TransformError> {
        Ok(payload)
    }
}
