//! Typed emitters for input events.
//!
//! The host calls these when an input (an audio or video source) changes.
//! Each emitter builds the event data document and hands it to an
//! [`EventSink`] under the matching intent.  Active and show state changes use
//! their own high-volume intents; everything else goes out under `Inputs`.

use std::sync::Arc;

use hostlink_core::EventSubscription;
use serde_json::{json, Map, Value};

use crate::application::broadcast::EventSink;

/// Number of audio mixer tracks an input can be routed to.
pub const AUDIO_TRACK_COUNT: u32 = 6;

/// Floor for [`volume_mul_to_db`] when the multiplier is zero.
pub const MIN_VOLUME_DB: f64 = -100.0;

/// Converts a linear volume multiplier into decibels.
///
/// Silence (`0.0`, which is `-inf` dB) clamps to [`MIN_VOLUME_DB`].
pub fn volume_mul_to_db(mul: f64) -> f64 {
    let db = 20.0 * mul.log10();
    if db.is_finite() {
        db
    } else {
        MIN_VOLUME_DB
    }
}

/// `{"1": bool, ..., "6": bool}` from a mixer bit mask (bit 0 is track 1).
pub fn audio_tracks_document(mixers: u32) -> Value {
    let tracks: Map<String, Value> = (0..AUDIO_TRACK_COUNT)
        .map(|track| ((track + 1).to_string(), Value::Bool(mixers & (1 << track) != 0)))
        .collect();
    Value::Object(tracks)
}

/// Emits input events through an [`EventSink`].
#[derive(Clone)]
pub struct InputEvents {
    sink: Arc<dyn EventSink>,
}

impl InputEvents {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    fn emit(&self, intent: u64, event_type: &str, data: Value) {
        self.sink.broadcast_event(intent, event_type, Some(data), 0);
    }

    pub fn input_created(&self, input_name: &str) {
        self.emit(EventSubscription::INPUTS, "InputCreated", json!({ "inputName": input_name }));
    }

    pub fn input_removed(&self, input_name: &str) {
        self.emit(EventSubscription::INPUTS, "InputRemoved", json!({ "inputName": input_name }));
    }

    pub fn input_name_changed(&self, old_input_name: &str, input_name: &str) {
        self.emit(
            EventSubscription::INPUTS,
            "InputNameChanged",
            json!({ "oldInputName": old_input_name, "inputName": input_name }),
        );
    }

    pub fn input_active_state_changed(&self, input_name: &str, video_active: bool) {
        self.emit(
            EventSubscription::INPUTS,
            "InputActiveStateChanged",
            json!({ "inputName": input_name, "videoActive": video_active }),
        );
    }

    pub fn input_show_state_changed(&self, input_name: &str, video_showing: bool) {
        self.emit(
            EventSubscription::INPUTS,
            "InputShowStateChanged",
            json!({ "inputName": input_name, "videoShowing": video_showing }),
        );
    }

    pub fn input_mute_state_changed(&self, input_name: &str, input_muted: bool) {
        self.emit(
            EventSubscription::INPUTS,
            "InputMuteStateChanged",
            json!({ "inputName": input_name, "inputMuted": input_muted }),
        );
    }

    pub fn input_volume_changed(&self, input_name: &str, input_volume_mul: f64) {
        self.emit(
            EventSubscription::INPUTS,
            "InputVolumeChanged",
            json!({
                "inputName": input_name,
                "inputVolumeMul": input_volume_mul,
                "inputVolumeDb": volume_mul_to_db(input_volume_mul),
            }),
        );
    }

    /// `offset_ns` is the host's offset in nanoseconds; clients see milliseconds.
    pub fn input_audio_sync_offset_changed(&self, input_name: &str, offset_ns: i64) {
        self.emit(
            EventSubscription::INPUTS,
            "InputAudioSyncOffsetChanged",
            json!({ "inputName": input_name, "inputAudioSyncOffset": offset_ns / 1_000_000 }),
        );
    }

    pub fn input_audio_tracks_changed(&self, input_name: &str, mixers: u32) {
        self.emit(
            EventSubscription::INPUTS,
            "InputAudioTracksChanged",
            json!({ "inputName": input_name, "inputAudioTracks": audio_tracks_document(mixers) }),
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
