use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Download,
    Assemble,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Segment URL while downloading, segment name while assembling.
    pub id: String,
    pub done: usize,
    pub total: usize,
}

/// Sending half of a progress event stream; silent when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl Progress {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn emit(&self, phase: Phase, id: impl Into<String>, done: usize, total: usize) {
        if let Some(sender) = &self.sender {
            // a dropped receiver only means nobody renders progress anymore
            let _ = sender.send(ProgressEvent {
                phase,
                id: id.into(),
                done,
                total,
            });
        }
    }
}
