use super::silence::{classify_window, SampleClass, SilencePolicy, SilenceStage, SilenceTracker};
use super::{append_downmixed_samples, meter};

fn policy() -> SilencePolicy {
    SilencePolicy::default()
}

fn silent_tracker() -> SilenceTracker {
    SilenceTracker::new(policy())
}

#[test]
fn downmixes_multi_channel_audio() {
    let mut buf = Vec::new();
    let samples = [1.0f32, -1.0, 0.5, 0.5];
    append_downmixed_samples(&mut buf, &samples, 2, |sample| sample);
    assert_eq!(buf, vec![0.0, 0.5]);
}

#[test]
fn downmix_handles_partial_frame() {
    let mut buf = Vec::new();
    let samples = [1.0f32, 3.0, 5.0];
    append_downmixed_samples(&mut buf, &samples, 2, |sample| sample);
    assert_eq!(buf, vec![2.0, 5.0]);
}

#[test]
fn classify_treats_dead_mic_as_silence() {
    let loud = vec![0.5f32; 128];
    assert_eq!(classify_window(&loud, false, 0.02), SampleClass::Silent);
    assert_eq!(classify_window(&loud, true, 0.02), SampleClass::Speaking);
}

#[test]
fn classify_uses_rms_threshold() {
    let quiet = vec![0.005f32; 128];
    assert_eq!(classify_window(&quiet, true, 0.02), SampleClass::Silent);
    let borderline = vec![0.02f32; 128];
    assert_eq!(classify_window(&borderline, true, 0.02), SampleClass::Speaking);
    assert_eq!(classify_window(&[], true, 0.02), SampleClass::Silent);
}

#[test]
fn stage_ladder_matches_thresholds() {
    let p = policy();
    assert_eq!(p.stage_for(0), SilenceStage::Active);
    assert_eq!(p.stage_for(4_999), SilenceStage::Active);
    assert_eq!(p.stage_for(5_000), SilenceStage::Gentle);
    assert_eq!(p.stage_for(8_000), SilenceStage::Supportive);
    assert_eq!(p.stage_for(12_000), SilenceStage::Options);
    assert_eq!(p.stage_for(20_000), SilenceStage::AutoStop);
    assert_eq!(p.stage_for(u64::MAX), SilenceStage::AutoStop);
}

#[test]
fn stage_is_pure_function_of_continuous_silence() {
    let mut tracker = silent_tracker();
    let mut stages = Vec::new();
    for _ in 0..25 {
        let update = tracker.on_sample(SampleClass::Silent, 1_000);
        stages.push(update.stage);
    }
    // Stages never decrease within one continuous silent run.
    assert!(stages.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(tracker.elapsed_silent_ms(), 25_000);
    assert_eq!(tracker.stage(), SilenceStage::AutoStop);
}

#[test]
fn single_speaking_sample_resets_everything() {
    let mut tracker = silent_tracker();
    for _ in 0..13 {
        tracker.on_sample(SampleClass::Silent, 1_000);
    }
    assert_eq!(tracker.stage(), SilenceStage::Options);

    let update = tracker.on_sample(SampleClass::Speaking, 16);
    assert_eq!(update.stage, SilenceStage::Active);
    assert_eq!(update.elapsed_silent_ms, 0);
    assert!(update.stage_changed);
    assert_eq!(tracker.elapsed_silent_ms(), 0);

    // Speaking again without a prior escalation is not a transition.
    let update = tracker.on_sample(SampleClass::Speaking, 16);
    assert!(!update.stage_changed);
}

#[test]
fn stage_transitions_fire_exactly_once() {
    let mut tracker = silent_tracker();
    let mut transitions = 0;
    for _ in 0..1_500 {
        let update = tracker.on_sample(SampleClass::Silent, 16);
        if update.stage_changed {
            transitions += 1;
        }
    }
    // 24 seconds of silence crosses each of the four stage boundaries once.
    assert_eq!(transitions, 4);
}

#[test]
fn auto_stop_fires_once_per_question() {
    let mut tracker = silent_tracker();
    let mut fired = 0;
    for _ in 0..40 {
        let update = tracker.on_sample(SampleClass::Silent, 1_000);
        if update.auto_stop {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);

    // Speech after the latch does not re-arm it within the same question.
    tracker.on_sample(SampleClass::Speaking, 16);
    for _ in 0..40 {
        let update = tracker.on_sample(SampleClass::Silent, 1_000);
        assert!(!update.auto_stop);
    }

    // A question change re-arms the latch.
    tracker.reset_for_question();
    let mut fired = 0;
    for _ in 0..40 {
        let update = tracker.on_sample(SampleClass::Silent, 1_000);
        if update.auto_stop {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);
}

#[test]
fn elapsed_accumulates_real_tick_durations() {
    let mut tracker = silent_tracker();
    tracker.on_sample(SampleClass::Silent, 16);
    tracker.on_sample(SampleClass::Silent, 48);
    tracker.on_sample(SampleClass::Silent, 7);
    assert_eq!(tracker.elapsed_silent_ms(), 71);
}

#[test]
fn custom_ladder_is_respected() {
    let p = SilencePolicy {
        gentle_ms: 100,
        supportive_ms: 200,
        options_ms: 300,
        auto_stop_ms: 400,
        ..SilencePolicy::default()
    };
    let mut tracker = SilenceTracker::new(p);
    let update = tracker.on_sample(SampleClass::Silent, 250);
    assert_eq!(update.stage, SilenceStage::Supportive);
    let update = tracker.on_sample(SampleClass::Silent, 150);
    assert_eq!(update.stage, SilenceStage::AutoStop);
    assert!(update.auto_stop);
}

#[test]
fn stage_indices_are_stable() {
    assert_eq!(SilenceStage::Active.index(), 0);
    assert_eq!(SilenceStage::Gentle.index(), 1);
    assert_eq!(SilenceStage::Supportive.index(), 2);
    assert_eq!(SilenceStage::Options.index(), 3);
    assert_eq!(SilenceStage::AutoStop.index(), 4);
}

#[test]
fn meter_db_matches_linear_rms() {
    let samples = vec![0.1f32; 64];
    let db = meter::rms_db(&samples);
    assert!((db + 20.0).abs() < 0.1, "0.1 amplitude should be about -20dB, got {db}");
}
