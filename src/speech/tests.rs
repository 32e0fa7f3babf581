use super::cache::{cache_key, Lookup, TtsCache};
use super::{FetchOutcome, SpeakDispatch, SpeechService};
use crate::config::VoiceConfig;
use crate::error::PlaybackError;

fn service() -> SpeechService {
    SpeechService::new(&VoiceConfig::default())
}

fn dispatch_key(dispatch: &SpeakDispatch) -> &str {
    match dispatch {
        SpeakDispatch::Fetch { key, .. } | SpeakDispatch::Joined { key, .. } => key,
        SpeakDispatch::Play { .. } => panic!("expected fetch/join dispatch"),
    }
}

#[test]
fn key_prefers_explicit_cache_key() {
    assert_eq!(
        cache_key("thalia", "en-US", "Tell me about a project.", Some("q-12")),
        "thalia|en-US|q-12"
    );
    assert_eq!(
        cache_key("thalia", "en-US", "Tell me about a project.", None),
        "thalia|en-US|Tell me about a project."
    );
}

#[test]
fn cache_is_single_flight() {
    let mut cache = TtsCache::new();
    assert_eq!(cache.lookup("k"), Lookup::Miss);
    assert!(cache.begin_fetch("k"));
    assert!(!cache.begin_fetch("k"));
    assert_eq!(cache.lookup("k"), Lookup::InFlight);

    let bytes = cache.complete("k", vec![1, 2, 3]);
    assert_eq!(&bytes[..], &[1, 2, 3]);
    assert_eq!(cache.lookup("k"), Lookup::Hit(bytes));
}

#[test]
fn failed_fetch_can_be_retried() {
    let mut cache = TtsCache::new();
    cache.begin_fetch("k");
    cache.fail("k");
    assert_eq!(cache.lookup("k"), Lookup::Miss);
    assert!(cache.begin_fetch("k"));
}

#[test]
fn empty_text_is_not_spoken() {
    let mut service = service();
    assert!(service.speak("", None).is_none());
    assert!(service.current_generation().is_none());
}

#[test]
fn first_speak_fetches_second_joins() {
    let mut service = service();
    let first = service.speak("What drives you?", Some("q-1")).unwrap();
    assert!(matches!(first, SpeakDispatch::Fetch { generation: 1, .. }));

    // Same key while the fetch is pending must not issue a second fetch.
    let second = service.speak("What drives you?", Some("q-1")).unwrap();
    match second {
        SpeakDispatch::Joined { generation, ref key } => {
            assert_eq!(generation, 2);
            assert_eq!(key, dispatch_key(&first));
        }
        other => panic!("expected join, got {other:?}"),
    }
}

#[test]
fn fetch_completion_serves_latest_generation() {
    let mut service = service();
    let dispatch = service.speak("Question one", Some("q-1")).unwrap();
    let key = dispatch_key(&dispatch).to_string();

    match service.on_fetch_complete(&key, Ok(vec![9, 9])) {
        Some(FetchOutcome::Play { generation, clip }) => {
            assert_eq!(generation, 1);
            assert_eq!(&clip[..], &[9, 9]);
        }
        other => panic!("expected play outcome, got {other:?}"),
    }
}

#[test]
fn superseded_speak_never_fires_old_callbacks() {
    let mut service = service();
    let a = service.speak("Question A", Some("q-a")).unwrap();
    let a_key = dispatch_key(&a).to_string();
    let b = service.speak("Question B", Some("q-b")).unwrap();
    let b_key = dispatch_key(&b).to_string();

    // A's fetch resolves after B superseded it: cached, but no playback.
    assert!(service.on_fetch_complete(&a_key, Ok(vec![1])).is_none());

    match service.on_fetch_complete(&b_key, Ok(vec![2])) {
        Some(FetchOutcome::Play { generation: 2, .. }) => {}
        other => panic!("expected B to play, got {other:?}"),
    }
    service.on_playback_started(2);

    // A's sink events (had it started) are stale too.
    assert!(!service.on_clip_ended(1));
    assert!(!service.on_clip_failed(1));
    assert!(service.on_clip_ended(2));
}

#[test]
fn replay_after_supersession_reuses_cached_bytes() {
    let mut service = service();
    let a = service.speak("Question A", Some("q-a")).unwrap();
    let a_key = dispatch_key(&a).to_string();
    service.speak("Question B", Some("q-b")).unwrap();
    service.on_fetch_complete(&a_key, Ok(vec![7]));

    // Replaying A later hits the cache even though its playback was skipped.
    match service.speak("Question A", Some("q-a")).unwrap() {
        SpeakDispatch::Play { generation: 3, clip } => assert_eq!(&clip[..], &[7]),
        other => panic!("expected cached play, got {other:?}"),
    }
    assert_eq!(service.cached_clips(), 1);
}

#[test]
fn fetch_failure_reports_error_for_current_generation() {
    let mut service = service();
    let dispatch = service.speak("Question one", Some("q-1")).unwrap();
    let key = dispatch_key(&dispatch).to_string();

    match service.on_fetch_complete(&key, Err(PlaybackError::Timeout)) {
        Some(FetchOutcome::Failed { generation: 1, error }) => {
            assert_eq!(error, PlaybackError::Timeout);
        }
        other => panic!("expected failure outcome, got {other:?}"),
    }
    // The failed key is retryable on a later replay.
    assert!(matches!(
        service.speak("Question one", Some("q-1")).unwrap(),
        SpeakDispatch::Fetch { .. }
    ));
}

#[test]
fn empty_audio_is_a_playback_error() {
    let mut service = service();
    let dispatch = service.speak("Question one", Some("q-1")).unwrap();
    let key = dispatch_key(&dispatch).to_string();

    match service.on_fetch_complete(&key, Ok(Vec::new())) {
        Some(FetchOutcome::Failed { error, .. }) => assert_eq!(error, PlaybackError::EmptyAudio),
        other => panic!("expected empty-audio failure, got {other:?}"),
    }
}

#[test]
fn cancel_discards_current_clip() {
    let mut service = service();
    let dispatch = service.speak("Question one", Some("q-1")).unwrap();
    let key = dispatch_key(&dispatch).to_string();
    service.cancel();
    assert!(service.current_generation().is_none());
    assert!(service.on_fetch_complete(&key, Ok(vec![1])).is_none());
}
