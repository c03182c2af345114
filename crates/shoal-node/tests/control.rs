//! Name-server channel: registration, heartbeat, and control dispatch.

mod common;

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;

use shoal_config::{BackupTarget, NodeOptions};
use shoal_node::control::{dispatch_control, register, run_heartbeat};
use shoal_node::replicate::ReplOp;
use shoal_proto::messages::{Heartbeat, RegisterAck, RegisterRequest, UpdateBackup};
use shoal_proto::{frame, MsgKind};

use common::{seed_file, test_node};

#[tokio::test]
async fn registration_handshake() {
    let ns = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ns_port = ns.local_addr().unwrap().port();

    let fake_ns = tokio::spawn(async move {
        let (mut sock, _) = ns.accept().await.unwrap();
        let req: RegisterRequest = frame::expect_message(&mut sock, MsgKind::S2nRegister)
            .await
            .unwrap();
        frame::send_message(
            &mut sock,
            MsgKind::N2sRegisterAck,
            &RegisterAck {
                new_ss_id: 1,
                backup_of_ss_id: -1,
                backup_ss_ip: String::new(),
                backup_ss_port: 0,
                must_recover: false,
            },
        )
        .await
        .unwrap();
        (req, sock)
    });

    let opts = NodeOptions {
        ns_ip: "127.0.0.1".into(),
        ns_port,
        ip: "127.0.0.1".into(),
        client_port: 9101,
        repl_port: 9102,
    };
    let (_stream, ack) = register(&opts).await.unwrap();

    assert_eq!(ack.new_ss_id, 1);
    assert_eq!(ack.backup_of_ss_id, -1);
    assert!(!ack.must_recover);
    assert!(BackupTarget::from_parts(&ack.backup_ss_ip, ack.backup_ss_port).is_none());

    let (req, _sock) = fake_ns.await.unwrap();
    assert_eq!(req.ip, "127.0.0.1");
    assert_eq!(req.client_port, 9101);
    // The node advertises its own replication listener as the address
    // peers use to back it up.
    assert_eq!(req.backup_ip, "127.0.0.1");
    assert_eq!(req.backup_port, 9102);
    assert_eq!(req.file_count, 0);
}

#[tokio::test]
async fn registration_fails_without_name_server() {
    // Bind then drop so nothing listens on the port.
    let ns = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ns_port = ns.local_addr().unwrap().port();
    drop(ns);

    let opts = NodeOptions {
        ns_ip: "127.0.0.1".into(),
        ns_port,
        ip: "127.0.0.1".into(),
        client_port: 9101,
        repl_port: 9102,
    };
    assert!(register(&opts).await.is_err());
}

#[tokio::test]
async fn heartbeats_carry_the_node_id() {
    let (client, mut server) = tokio::io::duplex(1024);
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(run_heartbeat(client, 7, Duration::from_millis(20), rx));

    for _ in 0..3 {
        let hb: Heartbeat = frame::expect_message(&mut server, MsgKind::S2nHeartbeat)
            .await
            .unwrap();
        assert_eq!(hb.ss_id, 7);
    }

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("heartbeat task should stop on shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn heartbeat_failure_is_fatal() {
    let (client, server) = tokio::io::duplex(1024);
    drop(server);
    let (_tx, rx) = watch::channel(false);

    let result = run_heartbeat(client, 7, Duration::from_millis(10), rx).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn update_backup_replaces_the_target() {
    let (node, _rx, _dir) = test_node(None);
    let (mut client, mut server) = tokio::io::duplex(1024);

    frame::send_message(
        &mut client,
        MsgKind::N2sUpdateBackup,
        &UpdateBackup {
            backup_ip: "10.0.0.9".into(),
            backup_port: 9202,
        },
    )
    .await
    .unwrap();

    let header = frame::read_header(&mut server).await.unwrap();
    dispatch_control(&node, &mut server, header).await.unwrap();

    assert_eq!(
        node.backup_target().await,
        BackupTarget::from_parts("10.0.0.9", 9202)
    );
}

#[tokio::test]
async fn re_replicate_all_sets_target_and_schedules() {
    let (node, mut rx, _dir) = test_node(None);
    seed_file(&node, "p.txt", "alice", b"primary", false);
    seed_file(&node, "held.txt", "bob", b"replica", true);

    let (mut client, mut server) = tokio::io::duplex(1024);
    frame::send_message(
        &mut client,
        MsgKind::N2sReReplicateAll,
        &UpdateBackup {
            backup_ip: "10.0.0.3".into(),
            backup_port: 9302,
        },
    )
    .await
    .unwrap();

    let header = frame::read_header(&mut server).await.unwrap();
    dispatch_control(&node, &mut server, header).await.unwrap();

    assert_eq!(
        node.backup_target().await,
        BackupTarget::from_parts("10.0.0.3", 9302)
    );

    let task = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.filename, "p.txt");
    assert_eq!(task.op, ReplOp::Update);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn sync_to_primary_is_passive() {
    let (node, mut rx, _dir) = test_node(None);
    let (mut client, mut server) = tokio::io::duplex(1024);

    frame::send_frame(&mut client, MsgKind::N2sSyncToPrimary, &[])
        .await
        .unwrap();
    let header = frame::read_header(&mut server).await.unwrap();
    dispatch_control(&node, &mut server, header).await.unwrap();

    // No outbound action and nothing scheduled.
    assert!(rx.try_recv().is_err());
}
