use room_core::ChannelId;

/// Server-side recording is out of scope (spec §1) but dispatch still needs
/// somewhere to send `start_recording`/`stop_recording`/`list_recordings` —
/// modeled as a trait boundary so a real muxer could be dropped in later
/// without touching dispatch code.
pub trait RecordingCollaborator: Send + Sync {
    fn start(&self, channel_id: ChannelId);
    fn stop(&self, channel_id: ChannelId);
    fn list(&self) -> Vec<String>;
}

/// Logs and otherwise does nothing. The only implementation shipped here.
pub struct NoopRecordingCollaborator;

impl RecordingCollaborator for NoopRecordingCollaborator {
    fn start(&self, channel_id: ChannelId) {
        tracing::info!(?channel_id, "recording start requested (no-op collaborator)");
    }

    fn stop(&self, channel_id: ChannelId) {
        tracing::info!(?channel_id, "recording stop requested (no-op collaborator)");
    }

    fn list(&self) -> Vec<String> {
        Vec::new()
    }
}
