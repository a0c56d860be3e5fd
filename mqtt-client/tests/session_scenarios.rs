mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{broker_publish, connack_accepted, fast_config, pubrel, suback, unsuback, wait_until, ChannelTransport};
use mqtt_client::{Client, ClientConfig, Delivery, QoS};

fn connected_client(id: &str, transport: &ChannelTransport) -> Client {
    transport.push_inbound(&connack_accepted());
    let client = Client::new(fast_config(id), Box::new(transport.clone()));
    client.connect().expect("connect should succeed against a staged CONNACK");
    transport.take_outbound(); // discard the CONNECT bytes
    client
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// S1 — QoS1 happy path.
#[test]
fn qos1_publish_is_delivered_once_and_acked() {
    let transport = ChannelTransport::new();
    let client = connected_client("s1", &transport);

    let deliveries: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deliveries);
    client
        .subscribe(
            "t",
            QoS::AtLeastOnce,
            Some(Box::new(move |d: &Delivery| {
                sink.lock().unwrap().push((d.topic_name.to_string(), d.payload.to_vec()));
            })),
        )
        .expect("subscribe should send SUBSCRIBE while connected");

    transport.take_outbound(); // discard the SUBSCRIBE bytes

    let publish_id: u16 = 9;
    let mut staged = suback(1, 1);
    staged.extend(broker_publish("t", b"hi", 1, false, Some(publish_id)));
    transport.push_inbound(&staged);

    let expected_puback = [0x40, 0x02, (publish_id >> 8) as u8, publish_id as u8];
    let mut seen_outbound = Vec::new();
    let ok = wait_until(Duration::from_secs(2), || {
        seen_outbound.extend(transport.take_outbound());
        !deliveries.lock().unwrap().is_empty() && contains_subsequence(&seen_outbound, &expected_puback)
    });

    assert!(ok, "expected one delivery and a PUBACK within the deadline");
    let delivered = deliveries.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0], ("t".to_string(), b"hi".to_vec()));
}

/// S2 — QoS2 duplicate delivery: handler fires once, PUBREC fires for each
/// arrival, PUBCOMP follows PUBREL.
#[test]
fn qos2_duplicate_publish_delivers_once_but_acks_every_arrival() {
    let transport = ChannelTransport::new();
    let client = connected_client("s2", &transport);

    let delivered_count = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&delivered_count);
    client
        .subscribe(
            "t2",
            QoS::ExactlyOnce,
            Some(Box::new(move |_d: &Delivery| {
                *sink.lock().unwrap() += 1;
            })),
        )
        .expect("subscribe should send SUBSCRIBE while connected");
    transport.take_outbound();

    let packet_id = 7u16;
    let mut staged = suback(1, 2);
    staged.extend(broker_publish("t2", b"x", 2, false, Some(packet_id)));
    staged.extend(broker_publish("t2", b"x", 2, true, Some(packet_id)));
    staged.extend(pubrel(packet_id));
    transport.push_inbound(&staged);

    let expected_pubrec = [0x50, 0x02, (packet_id >> 8) as u8, packet_id as u8];
    let expected_pubcomp = [0x70, 0x02, (packet_id >> 8) as u8, packet_id as u8];

    let mut seen_outbound = Vec::new();
    let ok = wait_until(Duration::from_secs(2), || {
        seen_outbound.extend(transport.take_outbound());
        let pubrec_count = seen_outbound
            .windows(expected_pubrec.len())
            .filter(|w| *w == expected_pubrec)
            .count();
        pubrec_count >= 2 && contains_subsequence(&seen_outbound, &expected_pubcomp)
    });

    assert!(ok, "expected two PUBRECs and a PUBCOMP within the deadline");
    assert_eq!(*delivered_count.lock().unwrap(), 1, "duplicate QoS2 delivery must not re-invoke the handler");
}

/// S5 — wildcard matching routes to the first-installed matching filter.
#[test]
fn wildcard_subscriptions_route_by_insertion_order() {
    let transport = ChannelTransport::new();
    let client = connected_client("s5", &transport);

    let routed: Arc<Mutex<Vec<(&'static str, String)>>> = Arc::new(Mutex::new(Vec::new()));

    let sink1 = Arc::clone(&routed);
    client
        .subscribe(
            "a/+/c",
            QoS::AtMostOnce,
            Some(Box::new(move |d: &Delivery| {
                sink1.lock().unwrap().push(("h1", d.topic_name.to_string()));
            })),
        )
        .unwrap();
    transport.take_outbound();

    let sink2 = Arc::clone(&routed);
    client
        .subscribe(
            "a/#",
            QoS::AtMostOnce,
            Some(Box::new(move |d: &Delivery| {
                sink2.lock().unwrap().push(("h2", d.topic_name.to_string()));
            })),
        )
        .unwrap();
    transport.take_outbound();

    // Both SUBACKs and both PUBLISHes are queued as one stream: the worker
    // reads them strictly in order, so the subscriptions are installed
    // before either PUBLISH is dispatched regardless of thread timing.
    let mut staged = suback(1, 0);
    staged.extend(suback(2, 0));
    staged.extend(broker_publish("a/b/c", b"1", 0, false, None));
    staged.extend(broker_publish("a/b/d", b"2", 0, false, None));
    transport.push_inbound(&staged);

    let ok = wait_until(Duration::from_secs(2), || routed.lock().unwrap().len() >= 2);
    assert!(ok, "expected both messages routed within the deadline");

    let routed = routed.lock().unwrap();
    assert_eq!(routed[0], ("h1", "a/b/c".to_string()));
    assert_eq!(routed[1], ("h2", "a/b/d".to_string()));
}

/// B4 — disconnect is terminal: subsequent calls refuse with `CleanSession`.
#[test]
fn disconnect_is_terminal_for_the_public_api() {
    let transport = ChannelTransport::new();
    let client = connected_client("b4", &transport);

    client.disconnect().expect("disconnect is best-effort and should not fail");

    let err = client.publish("t", b"x", QoS::AtMostOnce, false);
    assert!(matches!(err, Err(mqtt_client::Error::CleanSession)));

    let err = client.subscribe("t", QoS::AtMostOnce, None);
    assert!(matches!(err, Err(mqtt_client::Error::CleanSession)));
}

/// S3 — QoS2 publish retransmits with DUP=1 on ack timeout, same packet id.
#[test]
fn qos2_publish_retransmits_with_dup_on_ack_timeout() {
    let transport = ChannelTransport::new();
    let client = connected_client("s3", &transport);

    client.publish("t", b"p", QoS::ExactlyOnce, false).expect("publish should send while connected");

    let initial = transport.take_outbound();
    let expected_id = 1u16; // first packet id allocated by a fresh session
    let mut undup = vec![0u8; initial.len()];
    undup.copy_from_slice(&initial);
    assert_eq!(undup[0] & 0b1000, 0, "the first send must not carry DUP");

    let mut expected_dup = undup.clone();
    expected_dup[0] |= 0b1000;

    let mut seen_outbound = initial;
    let ok = wait_until(Duration::from_secs(2), || {
        seen_outbound.extend(transport.take_outbound());
        contains_subsequence(&seen_outbound, &expected_dup)
    });

    assert!(ok, "expected a DUP retransmit of packet id {expected_id} within the deadline");
}

/// S6 — a declared length exceeding the read buffer drains and reports
/// `BufferTooShort`; the next packet still parses normally off the same
/// stream.
#[test]
fn oversized_publish_is_drained_and_the_next_packet_still_parses() {
    let transport = ChannelTransport::new();
    let config = ClientConfig::builder("s6", "test-broker", 1883)
        .cmd_timeout_ms(150)
        .read_buf_size(16)
        .build();

    transport.push_inbound(&connack_accepted());
    let client = Client::new(config, Box::new(transport.clone()));
    client.connect().expect("connect should succeed against a staged CONNACK");
    transport.take_outbound();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    client
        .subscribe(
            "t6",
            QoS::AtMostOnce,
            Some(Box::new(move |d: &Delivery| {
                sink.lock().unwrap().push(d.topic_name.to_string());
            })),
        )
        .unwrap();
    transport.take_outbound();

    let mut staged = suback(1, 0);
    staged.extend(broker_publish("t6", &[b'x'; 40], 0, false, None)); // 40-byte payload overruns a 16-byte read buffer
    staged.extend(broker_publish("t6", b"ok", 0, false, None));
    transport.push_inbound(&staged);

    let ok = wait_until(Duration::from_secs(2), || !delivered.lock().unwrap().is_empty());
    assert!(ok, "the well-formed publish after the oversized one should still be delivered");
    assert_eq!(*delivered.lock().unwrap(), vec!["t6".to_string()]);
}

/// Unsubscribe removes the routing entry once UNSUBACK arrives.
#[test]
fn unsubscribe_stops_future_delivery() {
    let transport = ChannelTransport::new();
    let client = connected_client("unsub", &transport);

    let delivered = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&delivered);
    client
        .subscribe(
            "t3",
            QoS::AtMostOnce,
            Some(Box::new(move |_d: &Delivery| {
                *sink.lock().unwrap() += 1;
            })),
        )
        .unwrap();
    transport.take_outbound();
    let mut staged = suback(1, 0);
    staged.extend(broker_publish("t3", b"a", 0, false, None));
    transport.push_inbound(&staged);

    let ok = wait_until(Duration::from_secs(2), || *delivered.lock().unwrap() >= 1);
    assert!(ok, "expected the initial subscription to deliver at least once");

    client.unsubscribe("t3").expect("unsubscribe should send UNSUBSCRIBE while connected");
    transport.take_outbound();
    transport.push_inbound(&unsuback(2));

    std::thread::sleep(Duration::from_millis(300));
    let before = *delivered.lock().unwrap();
    transport.push_inbound(&broker_publish("t3", b"b", 0, false, None));
    std::thread::sleep(Duration::from_millis(300));

    assert_eq!(*delivered.lock().unwrap(), before, "message after unsubscribe must not be delivered");
}
