//! Concurrent callers share the one session and are served one at a time.

use dodtls::{
    dns::test_utils::{FakeCodec, RecvStep, TransportEvent},
    AddressFamily, DnsError,
};
use futures::future::join_all;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

mod helpers;
use helpers::{psk, server, Harness, HarnessBuilder};

const X: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_are_serialized() {
    let h = HarnessBuilder::new()
        .with_random(vec![0, 10])
        .build()
        .connected()
        .await;
    for _ in 0..4 {
        h.transport.push_recv(RecvStep::Reply(FakeCodec::reply(0, X, 60)));
    }

    let queries = ["a.example", "b.example", "c.example", "d.example"].map(|name| {
        let client = h.client.clone();
        tokio::spawn(async move { client.resolve(name, AddressFamily::Inet).await })
    });
    let results = join_all(queries).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().addr, X);
    }

    let events = h.transport.events();
    assert_eq!(events.len(), 8);
    for pair in events.chunks(2) {
        assert!(matches!(pair[0], TransportEvent::Send { .. }));
        assert!(matches!(pair[1], TransportEvent::Recv { .. }));
    }

    let ids: HashSet<u16> = h.codec.encoded_ids().into_iter().collect();
    assert_eq!(ids, HashSet::from([10, 11, 12, 13]));
    assert!(h.client.scratch_is_clear().await);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_waits_for_running_query() {
    let h = Harness::new().connected().await;
    h.transport.push_recv(RecvStep::Silence);
    h.transport.push_recv(RecvStep::Reply(FakeCodec::reply(0, X, 60)));

    let query = {
        let client = h.client.clone();
        tokio::spawn(async move { client.resolve("slow.example", AddressFamily::Inet).await })
    };
    while h.transport.count(|e| matches!(e, TransportEvent::Recv { .. })) == 0 {
        tokio::task::yield_now().await;
    }
    h.client.disconnect().await.unwrap();

    assert_eq!(query.await.unwrap().map(|r| r.addr), Ok(X));
    assert!(!h.client.is_active().await);

    let events = h.transport.events();
    let last_recv = events
        .iter()
        .rposition(|e| matches!(e, TransportEvent::Recv { .. }));
    let destroy = events
        .iter()
        .position(|e| matches!(e, TransportEvent::SessionDestroy));
    assert!(last_recv < destroy);
}

#[tokio::test(start_paused = true)]
async fn test_queries_after_concurrent_reconnect() {
    let h = Harness::new().connected().await;

    let reconnects = (0..3).map(|_| {
        let client = h.client.clone();
        tokio::spawn(async move { client.set_server(Some(server()), &psk()).await })
    });
    for result in join_all(reconnects).await {
        assert_eq!(result.unwrap(), Ok(()));
    }

    assert!(h.client.is_active().await);
    assert_eq!(h.credentials.len(), 1);
    assert_eq!(
        h.transport
            .count(|e| matches!(e, TransportEvent::CloseSocket)),
        3
    );

    h.client.disconnect().await.unwrap();
    assert_eq!(
        h.client.resolve("example.org", AddressFamily::Inet).await,
        Err(DnsError::NoServer)
    );
}
