//! End-to-end acquisition tests: mock transport → channel manager →
//! strategy → engine ingest → trigger window.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use wavescope_connect::testing::{ramp_batch, trigger_update, MockTransport};
use wavescope_connect::{
    ChannelManager, ChannelTransport, ChannelUri, ManagerConfig, Protocol, ReconnectSupervisor,
    TransportFactory,
};
use wavescope_core::{AcquireMode, ScopeConfig, ScopeEngine};

fn factory_for(transport: Arc<MockTransport>) -> TransportFactory {
    Arc::new(move |_uri| Arc::clone(&transport) as Arc<dyn ChannelTransport>)
}

fn scope_engine(capacity: usize) -> Arc<ScopeEngine> {
    let mut config = ScopeConfig::with_capacity(capacity).unwrap();
    config.array_id_field = Some("arrayId".into());
    config.data_time_field = Some("time".into());
    Arc::new(ScopeEngine::new(&config).unwrap())
}

#[tokio::test]
async fn free_running_acquisition_fills_the_engine() {
    let transport = Arc::new(MockTransport::new());
    let manager = ChannelManager::new(factory_for(Arc::clone(&transport)));
    let engine = scope_engine(8);

    let uri = ChannelUri::parse("pva://DET1:Waveform", Protocol::Pva).unwrap();
    let channel = manager.connect(&uri, None, None, true).await.unwrap();

    let ingest_engine = Arc::clone(&engine);
    channel
        .start(
            Some(Arc::new(move |batch| ingest_engine.ingest(&batch))),
            None,
            None,
        )
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    transport.set_connected(true);
    transport.deliver(ramp_batch(1, 4));
    transport.deliver(ramp_batch(2, 4));
    // Batch 3 is dropped on the wire.
    transport.deliver(ramp_batch(4, 4));

    let frame = engine.frame();
    // Capacity 8 keeps the newest two batches' worth of samples.
    assert_eq!(
        frame.fields["time"],
        vec![5.0, 6.0, 7.0, 8.0, 13.0, 14.0, 15.0, 16.0]
    );

    let stats = engine.statistics();
    assert_eq!(stats.metrics.arrays_received, 3);
    assert_eq!(stats.metrics.arrays_lost, 1);
    assert!(stats.metrics.object_size > 0);
    assert_eq!(stats.occupancy, 8);

    channel.stop();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.monitor_stops(), 1);
}

#[tokio::test]
async fn triggered_window_freezes_around_the_event() {
    let data_transport = Arc::new(MockTransport::new());
    let trigger_transport = Arc::new(MockTransport::new());
    let engine = scope_engine(6);

    let data_manager = ChannelManager::new(factory_for(Arc::clone(&data_transport)));
    let trigger_manager = ChannelManager::new(factory_for(Arc::clone(&trigger_transport)));

    engine.set_mode(AcquireMode::Triggered);
    engine.start_capture();

    let draws = Arc::new(AtomicUsize::new(0));
    let draw_counter = Arc::clone(&draws);
    engine.on_draw_ready(Arc::new(move || {
        draw_counter.fetch_add(1, Ordering::SeqCst);
    }));

    // Data channel feeds the engine.
    let data_uri = ChannelUri::new("DET1:Waveform", Protocol::Pva);
    let data_channel = data_manager.connect(&data_uri, None, None, true).await.unwrap();
    let ingest_engine = Arc::clone(&engine);
    data_channel
        .start(
            Some(Arc::new(move |batch| ingest_engine.ingest(&batch))),
            None,
            None,
        )
        .unwrap();

    // Trigger channel: probe reports its fields, then subscribe.
    let trigger_uri = ChannelUri::parse("ca://MPS:Trigger", Protocol::Pva).unwrap();
    trigger_transport.script_get(Ok(trigger_update(0.0, 0, 0)));
    let trigger_channel = trigger_manager
        .connect(&trigger_uri, None, None, false)
        .await
        .unwrap();
    let fields = trigger_channel.probe_fields().await.unwrap();
    assert!(fields.iter().any(|f| f == "value"));
    assert!(fields.iter().any(|f| f.starts_with("timeStamp.")));

    let trigger_engine = Arc::clone(&engine);
    trigger_channel
        .start(
            Some(Arc::new(move |batch| {
                trigger_engine.handle_trigger_batch(&batch);
            })),
            None,
            None,
        )
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    data_transport.set_connected(true);
    trigger_transport.set_connected(true);

    // Pre-trigger data: time [1, 2, 3].
    data_transport.deliver(ramp_batch(1, 3));
    assert_eq!(draws.load(Ordering::SeqCst), 0);

    // The first trigger delivery is the connection artifact.
    trigger_transport.deliver(trigger_update(1.0, 2, 0));
    assert_eq!(draws.load(Ordering::SeqCst), 0);

    // The second fires at t=2.0; 3 post-trigger samples are required.
    trigger_transport.deliver(trigger_update(2.0, 2, 0));
    assert_eq!(draws.load(Ordering::SeqCst), 0);
    assert_eq!(engine.statistics().trigger_status, "Collecting Data");

    // The next data batch completes the window and emits exactly once.
    data_transport.deliver(ramp_batch(2, 3));
    assert_eq!(draws.load(Ordering::SeqCst), 1);

    let frame = engine.frame();
    assert_eq!(frame.fields["time"], vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(frame.fields["wave"], vec![10.0, 20.0, 30.0, 40.0]);
    assert_eq!(frame.trigger_marker, Some(1));

    // Edge-triggered: further data without a new event emits nothing.
    data_transport.deliver(ramp_batch(3, 3));
    assert_eq!(draws.load(Ordering::SeqCst), 1);
    assert_eq!(engine.statistics().trigger_status, "Waiting for trigger");
}

#[tokio::test]
async fn failed_channel_recovers_through_supervision() {
    let transport = Arc::new(MockTransport::new());
    let manager = ChannelManager::with_config(
        factory_for(Arc::clone(&transport)),
        ManagerConfig {
            monitor_queue_size: Some(16),
            reconnect_period: Duration::from_millis(10),
        },
    );

    let uri = ChannelUri::new("DET1:Waveform", Protocol::Pva);
    let channel = manager.connect(&uri, None, None, true).await.unwrap();

    let supervisor = Arc::new(ReconnectSupervisor::new(
        Arc::clone(&channel),
        manager.config().reconnect_period,
    ));
    let refreshes = Arc::new(AtomicUsize::new(0));
    let refresh_counter = Arc::clone(&refreshes);
    supervisor.on_recovered(Arc::new(move || {
        refresh_counter.fetch_add(1, Ordering::SeqCst);
    }));

    let watch = Arc::clone(&supervisor);
    channel
        .start(
            None,
            None,
            Some(Arc::new(move |state, _msg| watch.handle_state(state))),
        )
        .unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(
        transport.last_monitor_options().unwrap().queue_size,
        Some(16)
    );

    transport.set_connected(true);
    assert!(channel.is_running());

    // The transport drops while running: error path, supervision arms.
    transport.fail_next_gets(2);
    transport.set_connected(false);
    assert_eq!(channel.state().to_string(), "Failed to connect");
    assert!(supervisor.armed());

    // Two probes fail, the third succeeds: strategy restarts and the
    // field-description refresh runs.
    sleep(Duration::from_millis(100)).await;
    assert!(!supervisor.armed());
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert!(transport.monitor_starts() >= 2);
    assert!(channel.is_running());
}

#[tokio::test]
async fn polled_acquisition_feeds_the_engine() {
    let transport = Arc::new(MockTransport::new());
    transport.set_default_get(Ok(ramp_batch(1, 4)));
    let manager = ChannelManager::new(factory_for(Arc::clone(&transport)));
    let engine = scope_engine(16);

    let uri = ChannelUri::new("DET1:Waveform", Protocol::Pva);
    let channel = manager.connect(&uri, None, None, true).await.unwrap();

    let ingest_engine = Arc::clone(&engine);
    channel
        .start(
            Some(Arc::new(move |batch| ingest_engine.ingest(&batch))),
            Some(100.0),
            None,
        )
        .unwrap();
    sleep(Duration::from_millis(80)).await;
    channel.stop();

    let stats = engine.statistics();
    assert!(stats.metrics.arrays_received >= 2);
    // The same id repeats; a non-advancing id is not a loss.
    assert_eq!(stats.metrics.arrays_lost, 0);

    // Each poll appended the same 4-sample waveform.
    let frame = engine.frame();
    assert!(frame.fields["time"].ends_with(&[1.0, 2.0, 3.0, 4.0]));
    assert!(frame.fields["time"].len() <= 16);
}
