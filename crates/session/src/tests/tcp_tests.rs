use super::*;

use std::time::Duration;

async fn until_no_clients(transport: &TcpTransport) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !transport.connected_clients().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client removed");
}

#[tokio::test]
async fn reconnecting_clients_do_not_accumulate_tasks() {
    let transport = TcpTransport::new("127.0.0.1:0".parse().expect("addr"));
    let (inbound, _frames) = mpsc::unbounded_channel();
    let local_addr = transport.start(inbound).await.expect("start");

    for _ in 0..5 {
        let client = TcpStream::connect(local_addr).await.expect("connect");
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.connected_clients().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client registered");
        drop(client);
        until_no_clients(&transport).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _last = TcpStream::connect(local_addr).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let tracked = transport.tasks.lock().unwrap_or_else(|e| e.into_inner()).len();
    assert!(tracked <= 4, "{tracked} connection tasks still tracked");

    transport.stop().await.expect("stop");
}
