//! Client for the external embedding extractor service.

use async_trait::async_trait;
use facefind_core::{Descriptor, Extraction, ExtractorError, FaceExtractor, Frame};

// `#[zbus::proxy]` generates `ExtractorProxy` from this trait.
#[zbus::proxy(interface = "org.facefind.Extractor1", default_path = "/org/facefind/Extractor1")]
trait Extractor {
    /// Load detection and descriptor models. Returns once they are usable.
    async fn load_model(&self) -> zbus::Result<()>;

    /// Detect the most prominent face in a grayscale frame.
    /// Returns `(found, descriptor)`; the descriptor is empty when `found` is false.
    async fn extract(&self, frame: &[u8], width: u32, height: u32) -> zbus::Result<(bool, Vec<f64>)>;
}

pub struct DbusExtractor {
    proxy: ExtractorProxy<'static>,
}

impl DbusExtractor {
    pub async fn connect(conn: &zbus::Connection, service: &str) -> zbus::Result<Self> {
        let proxy = ExtractorProxy::builder(conn)
            .destination(service.to_string())?
            .build()
            .await?;
        Ok(Self { proxy })
    }
}

/// Errors the service itself replied with are extraction failures;
/// anything else means it could not be reached.
fn map_call_error(e: zbus::Error) -> ExtractorError {
    match e {
        zbus::Error::MethodError(name, detail, _) => {
            ExtractorError::ExtractionFailed(format!("{name}: {}", detail.unwrap_or_default()))
        }
        zbus::Error::FDO(fdo) => ExtractorError::ExtractionFailed(fdo.to_string()),
        other => ExtractorError::Unreachable(other.to_string()),
    }
}

fn to_extraction(found: bool, values: Vec<f64>) -> Extraction {
    if found {
        Extraction::Face(Descriptor::new(values.into_iter().map(|v| v as f32).collect()))
    } else {
        Extraction::NoFace
    }
}

#[async_trait]
impl FaceExtractor for DbusExtractor {
    async fn load(&self) -> Result<(), ExtractorError> {
        self.proxy
            .load_model()
            .await
            .map_err(|e| ExtractorError::ModelLoad(e.to_string()))
    }

    async fn extract(&self, frame: &Frame) -> Result<Extraction, ExtractorError> {
        let (found, values) = self
            .proxy
            .extract(&frame.data, frame.width, frame.height)
            .await
            .map_err(map_call_error)?;
        tracing::debug!(found, len = values.len(), seq = frame.sequence, "extractor replied");
        Ok(to_extraction(found, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_conversion() {
        assert_eq!(to_extraction(false, vec![]), Extraction::NoFace);
        assert_eq!(
            to_extraction(true, vec![0.5, -0.25]),
            Extraction::Face(Descriptor::new(vec![0.5, -0.25]))
        );
    }

    #[test]
    fn test_fdo_error_is_extraction_failure() {
        let e = zbus::Error::FDO(Box::new(zbus::fdo::Error::Failed("bad frame".into())));
        assert!(matches!(map_call_error(e), ExtractorError::ExtractionFailed(_)));
    }

    #[test]
    fn test_transport_error_is_unreachable() {
        let e = zbus::Error::InputOutput(std::sync::Arc::new(std::io::Error::from(
            std::io::ErrorKind::ConnectionRefused,
        )));
        assert!(matches!(map_call_error(e), ExtractorError::Unreachable(_)));
    }
}
