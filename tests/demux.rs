use dmux::{Close, ConsumableStream, Packet, StreamDemux, StreamEmitter};
use std::time::Duration;

/// Helper macro to add timeout to tests
macro_rules! test_with_timeout {
    ($test_name:ident, $timeout_secs:expr, $test_body:block) => {
        #[tokio::test]
        async fn $test_name() {
            let result = tokio::time::timeout(
                Duration::from_secs($timeout_secs),
                async move $test_body
            ).await;

            match result {
                Ok(Ok(())) => {},
                Ok(Err(e)) => panic!("Test failed: {:?}", e),
                Err(_) => panic!("Test timed out after {} seconds", $timeout_secs),
            }
        }
    };
}

// Writing to a key nobody consumes yet creates the stream silently; a
// consumer obtained afterwards sees only items written after its attach.
test_with_timeout!(test_write_before_any_consumer_is_silent, 10, {
    let demux = StreamDemux::new();
    demux.write("chan:1", 42)?;

    let mut consumer = demux.stream("chan:1");
    demux.write("chan:1", 43)?;

    assert_eq!(consumer.next().await, Packet::Item(43));

    Ok::<(), Box<dyn std::error::Error>>(())
});

// No ordering guarantee across keys, but within each key every consumer
// observes a strictly ordered, gap-free subsequence.
test_with_timeout!(test_per_key_ordering_with_interleaved_writes, 10, {
    let demux = StreamDemux::new();
    let mut odd = demux.stream("odd");
    let mut even = demux.stream("even");

    for i in 0..100 {
        let key = if i % 2 == 0 { "even" } else { "odd" };
        demux.write(key, i)?;
    }
    demux.close_all();

    let mut seen_odd = Vec::new();
    loop {
        match odd.next().await {
            Packet::Item(value) => seen_odd.push(value),
            Packet::Done(_) => break,
        }
    }
    let mut seen_even = Vec::new();
    loop {
        match even.next().await {
            Packet::Item(value) => seen_even.push(value),
            Packet::Done(_) => break,
        }
    }

    assert_eq!(seen_odd, (0..100).filter(|i| i % 2 == 1).collect::<Vec<_>>());
    assert_eq!(seen_even, (0..100).filter(|i| i % 2 == 0).collect::<Vec<_>>());

    Ok::<(), Box<dyn std::error::Error>>(())
});

// The long-lived lifecycle-listener pattern: a background task holds a
// consumer and runs until it observes the terminal packet.
test_with_timeout!(test_background_listener_runs_until_done, 10, {
    let emitter = StreamEmitter::new();
    let mut listener = emitter.listener("connecting");

    let task = tokio::spawn(async move {
        let mut events = 0;
        while let Packet::Item(_) = listener.next().await {
            events += 1;
        }
        events
    });

    for attempt in 0..3 {
        emitter.emit("connecting", attempt)?;
    }
    emitter.close_listener("connecting");

    assert_eq!(task.await?, 3);

    Ok::<(), Box<dyn std::error::Error>>(())
});

// A background task can also be torn down from outside through its
// cancel handle, without waiting for the producer to close anything.
test_with_timeout!(test_background_listener_cancelled_externally, 10, {
    let emitter: StreamEmitter<i32> = StreamEmitter::new();
    let mut listener = emitter.listener("close");
    let handle = listener.cancel_handle();

    let task = tokio::spawn(async move { listener.next().await });
    tokio::task::yield_now().await;
    handle.cancel();

    assert_eq!(task.await?, Packet::Done(Close::Empty));
    assert_eq!(emitter.listener_count("close"), 0);

    Ok::<(), Box<dyn std::error::Error>>(())
});

// close_all resolves every consumer suspended on any key, the shutdown
// path a transport layer takes when the connection dies.
test_with_timeout!(test_close_all_resolves_all_suspended_consumers, 10, {
    let demux: StreamDemux<String> = StreamDemux::new();

    let mut tasks = Vec::new();
    for key in ["data", "rpc:1", "lifecycle"] {
        let mut consumer = demux.stream(key);
        tasks.push(tokio::spawn(async move { consumer.next().await }));
    }
    tokio::task::yield_now().await;

    assert_eq!(demux.close_all_with("connection lost".to_string()), 3);
    for task in tasks {
        assert_eq!(
            task.await?,
            Packet::Done(Close::Value("connection lost".to_string()))
        );
    }
    assert!(demux.is_empty());

    Ok::<(), Box<dyn std::error::Error>>(())
});

// RPC-response correlation reduces to a single-use key: the response is
// delivered as the close value of the correlation-id stream.
test_with_timeout!(test_rpc_correlation_key_roundtrip, 10, {
    let emitter = StreamEmitter::new();
    let mut pending = emitter.listener("rpc:17");

    let responder = emitter.clone();
    tokio::spawn(async move {
        responder.close_listener_with("rpc:17", "pong");
    });

    assert_eq!(pending.next().await, Packet::Done(Close::Value("pong")));
    // The correlation key is gone once its one consumer drained it.
    assert_eq!(emitter.listener_count("rpc:17"), 0);

    Ok::<(), Box<dyn std::error::Error>>(())
});

// Channel fan-out: every subscriber of a channel-qualified key gets each
// published value, filtered through its own transform chain.
test_with_timeout!(test_channel_fanout_with_transforms, 10, {
    let demux = StreamDemux::new();
    let mut raw = demux.stream("channel/news");
    let mut shouted = demux
        .stream("channel/news")
        .map(|s: String| s.to_uppercase());

    demux.write("channel/news", "hello".to_string())?;

    assert_eq!(raw.next().await, Packet::Item("hello".to_string()));
    assert_eq!(shouted.next().await, Packet::Item("HELLO".to_string()));

    Ok::<(), Box<dyn std::error::Error>>(())
});

// A producer failure propagates to every consumer of that key as a
// terminal error, and never touches other keys.
test_with_timeout!(test_close_with_error_is_scoped_to_its_key, 10, {
    let demux = StreamDemux::new();
    let mut failing = demux.stream("bad");
    let mut healthy = demux.stream("good");

    demux.close_with_error("bad", "decode failure");
    demux.write("good", 1)?;

    match failing.next().await {
        Packet::Done(Close::Error(err)) => {
            assert!(!err.is_recoverable());
        }
        other => panic!("expected terminal error, got {other:?}"),
    }
    assert_eq!(healthy.next().await, Packet::Item(1));

    Ok::<(), Box<dyn std::error::Error>>(())
});

// Aggregate backpressure is the connection-wide throttling figure: the
// worst per-consumer lag across every key.
test_with_timeout!(test_aggregate_backpressure_for_flow_control, 10, {
    let emitter = StreamEmitter::new();
    let mut kept_up = emitter.listener("fast");
    let _stalled = emitter.listener("slow");

    for i in 0..10 {
        emitter.emit("fast", i)?;
        emitter.emit("slow", i)?;
        kept_up.next().await;
    }

    assert_eq!(emitter.backpressure_of("fast"), 0);
    assert_eq!(emitter.backpressure_of("slow"), 10);
    assert_eq!(emitter.backpressure(), 10);

    Ok::<(), Box<dyn std::error::Error>>(())
});
