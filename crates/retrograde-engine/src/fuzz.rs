//! Entry points for the cargo-fuzz targets.

use crate::config::ParameterDefaults;
use crate::media::{MediaDecoder, SourceDecoder};
use crate::{ParameterUpdate, PlaybackParameters, SegmentPlanner};

/// Decoding arbitrary bytes must fail cleanly or yield a consistent buffer.
pub fn fuzz_decode_source(data: &[u8]) {
    if let Ok(source) = MediaDecoder::new().decode(data) {
        assert!(source.sample_rate() > 0.0);
        for channel in source.samples() {
            assert_eq!(channel.len(), source.frames());
        }
    }
}

/// Any update that resolves must satisfy the window and fade bounds.
pub fn fuzz_resolve_parameters(data: &[u8]) {
    let Ok(update) = serde_json::from_slice::<ParameterUpdate>(data) else {
        return;
    };
    let defaults = ParameterDefaults::default();
    let Ok(params) = PlaybackParameters::resolve(&update, None, &defaults, Some(60.0)) else {
        return;
    };
    assert!(params.period > 0.0 && params.step > 0.0);
    for planned in SegmentPlanner::iter(params.start_position, params).take(256) {
        assert!(planned.segment_start >= 0.0);
        assert!(planned.actual_duration <= params.segment_duration + 1e-9);
        let envelope = planned.envelope;
        assert!(envelope.fade_in + envelope.fade_out <= planned.actual_duration + 1e-9);
    }
}
