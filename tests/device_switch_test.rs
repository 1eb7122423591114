//! Mid-call device switching

mod common;

use common::{fixture, start_both};
use duocall::application::CallStatus;
use duocall::domain::media::MediaKind;
use duocall::domain::shared::value_objects::DeviceId;
use duocall::CallError;

#[tokio::test]
async fn test_camera_swap_preserves_audio_identity() {
    let f = fixture();
    start_both(&f).await;

    let before = f.alice.local_stream().await.unwrap();
    let audio_id = before.track(MediaKind::Audio).unwrap().id();
    let old_video = before.track(MediaKind::Video).unwrap().clone();

    f.alice
        .switch_camera(DeviceId::new("synthetic-cam-1"))
        .await
        .unwrap();

    let after = f.alice.local_stream().await.unwrap();
    let outgoing = f.alice_transport.outgoing_tracks().await;

    // video track is new, locally and on the wire
    let new_video = after.track(MediaKind::Video).unwrap();
    assert_ne!(new_video.id(), old_video.id());
    assert_eq!(outgoing[&MediaKind::Video], new_video.id());
    assert!(old_video.is_stopped());

    // the audio track is the exact same object, still live
    assert_eq!(after.track(MediaKind::Audio).unwrap().id(), audio_id);
    assert_eq!(outgoing[&MediaKind::Audio], audio_id);
    assert!(!after.track(MediaKind::Audio).unwrap().is_stopped());

    // the call itself never blinked
    assert_eq!(f.alice.status(), CallStatus::Connected);
}

#[tokio::test]
async fn test_microphone_swap_preserves_video_identity() {
    let f = fixture();
    start_both(&f).await;

    let before = f.alice.local_stream().await.unwrap();
    let video_id = before.track(MediaKind::Video).unwrap().id();

    f.alice
        .switch_microphone(DeviceId::new("synthetic-mic-1"))
        .await
        .unwrap();

    let after = f.alice.local_stream().await.unwrap();
    assert_eq!(after.track(MediaKind::Video).unwrap().id(), video_id);
    assert_eq!(
        after.track(MediaKind::Audio).unwrap().device().as_str(),
        "synthetic-mic-1"
    );
}

#[tokio::test]
async fn test_switch_to_unknown_camera_keeps_current_stream() {
    let f = fixture();
    start_both(&f).await;

    let before = f.alice.local_stream().await.unwrap();
    let video_id = before.track(MediaKind::Video).unwrap().id();

    let err = f
        .alice
        .switch_camera(DeviceId::new("no-such-cam"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::DeviceUnavailable(_)));

    // old track untouched, call still up
    let after = f.alice.local_stream().await.unwrap();
    let video = after.track(MediaKind::Video).unwrap();
    assert_eq!(video.id(), video_id);
    assert!(!video.is_stopped());
    assert_eq!(f.alice.status(), CallStatus::Connected);
}

#[tokio::test]
async fn test_switch_before_call_needs_a_stream() {
    let f = fixture();
    let err = f
        .alice
        .switch_camera(DeviceId::new("synthetic-cam-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::InvalidOperation(_)));
}

#[tokio::test]
async fn test_device_listing_before_call() {
    let f = fixture();
    let lists = f.alice.list_devices().await;
    assert_eq!(lists.video_inputs.len(), 2);
    assert_eq!(lists.audio_inputs.len(), 2);
    assert!(lists.video_inputs.iter().all(|d| !d.label.is_empty()));
}
