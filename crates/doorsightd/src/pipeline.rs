use crate::notifier::{DispatchError, Notifier};
use doorsight_core::{FaceEncoder, Gallery, MatchResult, Matcher};
use doorsight_hw::{Capture, CaptureError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("notification failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// What one trigger produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub result: MatchResult,
    pub caption: String,
}

/// Work the trigger controller runs once per qualifying trigger.
pub trait TriggerHandler {
    fn handle_trigger(&mut self) -> Result<(), PipelineError>;
}

/// Capture → encode → match → notify, strictly in sequence.
///
/// Owns the gallery for the process lifetime. Every run overwrites the same
/// image path, which is safe because runs never overlap.
pub struct Pipeline<C, E, N> {
    capture: C,
    encoder: E,
    notifier: N,
    matcher: Box<dyn Matcher + Send>,
    gallery: Gallery,
    image_path: PathBuf,
}

impl<C, E, N> Pipeline<C, E, N>
where
    C: Capture,
    E: FaceEncoder,
    N: Notifier,
{
    pub fn new(
        capture: C,
        encoder: E,
        notifier: N,
        matcher: Box<dyn Matcher + Send>,
        gallery: Gallery,
        image_path: PathBuf,
    ) -> Self {
        Self {
            capture,
            encoder,
            notifier,
            matcher,
            gallery,
            image_path,
        }
    }

    /// Run one capture-to-notification pass. No step is retried.
    pub fn run(&mut self) -> Result<Notification, PipelineError> {
        tracing::info!(path = %self.image_path.display(), "capturing image");
        self.capture.capture(&self.image_path)?;

        // An unreadable capture is treated the same as a faceless one.
        let probe = match self.encoder.encode(&self.image_path) {
            Ok(encodings) => encodings.into_iter().next(),
            Err(e) => {
                tracing::warn!(error = %e, "cannot encode captured image; treating as no face");
                None
            }
        };

        let result = match &probe {
            Some(probe) => self.matcher.find(probe, &self.gallery),
            None => {
                tracing::debug!("no face in captured image");
                MatchResult::Unknown
            }
        };
        let caption = result.caption();

        tracing::info!(
            identity = result.label().unwrap_or("unknown"),
            face = probe.is_some(),
            "sending notification"
        );
        self.notifier.send_photo(&self.image_path, &caption)?;
        tracing::info!("notification sent");

        Ok(Notification { result, caption })
    }
}

impl<C, E, N> TriggerHandler for Pipeline<C, E, N>
where
    C: Capture,
    E: FaceEncoder,
    N: Notifier,
{
    fn handle_trigger(&mut self) -> Result<(), PipelineError> {
        self.run().map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use doorsight_core::detector::DetectorError;
    use doorsight_core::{EncodeError, Embedding, FirstMatchMatcher, GalleryEntry};
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    /// Writes a scripted byte string as the "photo" on each call.
    pub(crate) struct ScriptedCapture {
        shots: Vec<&'static str>,
        calls: usize,
        fail: bool,
    }

    impl ScriptedCapture {
        pub(crate) fn new(shots: &[&'static str]) -> Self {
            Self { shots: shots.to_vec(), calls: 0, fail: false }
        }
    }

    impl Capture for ScriptedCapture {
        fn capture(&mut self, output: &Path) -> Result<(), CaptureError> {
            if self.fail {
                return Err(CaptureError::MissingOutput(output.to_path_buf()));
            }
            let body = self.shots[self.calls % self.shots.len()];
            self.calls += 1;
            std::fs::create_dir_all(output.parent().unwrap())?;
            std::fs::write(output, body)?;
            Ok(())
        }
    }

    /// Decodes the photo body: "alice" → vA, "stranger" → far vector,
    /// "blank" → no face, "corrupt" → encoder error.
    pub(crate) struct BodyEncoder;

    impl FaceEncoder for BodyEncoder {
        fn encode(&mut self, image_path: &Path) -> Result<Vec<Embedding>, EncodeError> {
            match std::fs::read_to_string(image_path).unwrap().as_str() {
                "alice" => Ok(vec![Embedding::new(vec![0.05, 0.0])]),
                "stranger" => Ok(vec![Embedding::new(vec![-5.0, 5.0])]),
                "blank" => Ok(vec![]),
                _ => Err(EncodeError::Detector(DetectorError::EmptyImage)),
            }
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct RecordingNotifier {
        /// (photo path, photo body at send time, caption)
        pub(crate) sent: Rc<RefCell<Vec<(PathBuf, String, String)>>>,
        fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn send_photo(&self, photo: &Path, caption: &str) -> Result<(), DispatchError> {
            if self.fail {
                return Err(DispatchError::Rejected { status: 401, description: "Unauthorized".into() });
            }
            let body = std::fs::read_to_string(photo).unwrap();
            self.sent.borrow_mut().push((photo.to_path_buf(), body, caption.to_string()));
            Ok(())
        }
    }

    fn alice_gallery() -> Gallery {
        [GalleryEntry { label: "Alice".into(), encoding: Embedding::new(vec![0.0, 0.0]) }]
            .into_iter()
            .collect()
    }

    pub(crate) fn pipeline(
        capture: ScriptedCapture,
        notifier: RecordingNotifier,
        image_path: PathBuf,
    ) -> Pipeline<ScriptedCapture, BodyEncoder, RecordingNotifier> {
        Pipeline::new(
            capture,
            BodyEncoder,
            notifier,
            Box::new(FirstMatchMatcher { tolerance: 0.6 }),
            alice_gallery(),
            image_path,
        )
    }

    #[test]
    fn test_known_visitor_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detected.jpg");
        let notifier = RecordingNotifier::default();
        let mut p = pipeline(ScriptedCapture::new(&["alice"]), notifier.clone(), path.clone());

        let outcome = p.run().unwrap();
        assert_eq!(outcome.result, MatchResult::Identified("Alice".into()));
        assert_eq!(outcome.caption, "Alice is waiting outside.");

        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], (path, "alice".to_string(), "Alice is waiting outside.".to_string()));
    }

    #[test]
    fn test_faceless_capture_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let mut p = pipeline(ScriptedCapture::new(&["blank"]), notifier.clone(), dir.path().join("d.jpg"));

        let outcome = p.run().unwrap();
        assert_eq!(outcome.result, MatchResult::Unknown);
        assert_eq!(notifier.sent.borrow()[0].2, "Unknown person is waiting outside.");
    }

    #[test]
    fn test_unmatched_face_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let mut p = pipeline(ScriptedCapture::new(&["stranger"]), notifier.clone(), dir.path().join("d.jpg"));

        assert_eq!(p.run().unwrap().caption, "Unknown person is waiting outside.");
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn test_encoder_error_is_unknown_not_failure() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let mut p = pipeline(ScriptedCapture::new(&["corrupt"]), notifier.clone(), dir.path().join("d.jpg"));

        assert_eq!(p.run().unwrap().result, MatchResult::Unknown);
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn test_capture_failure_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let mut capture = ScriptedCapture::new(&["alice"]);
        capture.fail = true;
        let mut p = pipeline(capture, notifier.clone(), dir.path().join("d.jpg"));

        assert!(matches!(p.run(), Err(PipelineError::Capture(_))));
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn test_dispatch_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier { fail: true, ..Default::default() };
        let mut p = pipeline(ScriptedCapture::new(&["alice"]), notifier, dir.path().join("d.jpg"));

        let err = p.handle_trigger().unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(DispatchError::Rejected { status: 401, .. })));
    }

    #[test]
    fn test_image_slot_holds_only_latest_capture() {
        let dir = tempfile::tempdir().unwrap();
        let slot = dir.path().join("slot");
        let path = slot.join("detected.jpg");
        let notifier = RecordingNotifier::default();
        let mut p = pipeline(ScriptedCapture::new(&["alice", "stranger"]), notifier.clone(), path.clone());

        p.run().unwrap();
        p.run().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "stranger");
        assert_eq!(std::fs::read_dir(&slot).unwrap().count(), 1);

        let captions: Vec<String> = notifier.sent.borrow().iter().map(|s| s.2.clone()).collect();
        assert_eq!(captions, vec!["Alice is waiting outside.", "Unknown person is waiting outside."]);
    }
}
