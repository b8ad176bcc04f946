//! End-to-end SSH session against an in-memory mock server.
//!
//! The mock drives the real server-side message flow over a duplex pipe
//! using the same transport and message types as the client, with
//! single-entry algorithm lists. The client must finish the handshake,
//! authenticate, run `echo test`, and collect `test\n` plus exit status 0,
//! all over genuinely encrypted and MACed framing.

use std::time::Duration;

use sonde_platform::SondeError;
use sonde_proto::guard::Deadline;
use sonde_proto::ssh::auth::{AuthFailure, ServiceAccept, ServiceRequest, USERAUTH_SERVICE};
use sonde_proto::ssh::channel::{
    recipient_only, ChannelData, ChannelOpen, ChannelOpenConfirmation, ChannelRequest,
};
use sonde_proto::ssh::client::SshClient;
use sonde_proto::ssh::crypto::{
    CipherState, DirectionState, MacState, CIPHER_IV_LEN, CIPHER_KEY_LEN, MAC_KEY_LEN,
};
use sonde_proto::ssh::kex::KexInit;
use sonde_proto::ssh::kex_dh::{self, ClientKex, KexDhInit, KexDhReply};
use sonde_proto::ssh::message::MessageType;
use sonde_proto::ssh::transport::Transport;
use sonde_proto::ssh::version::Version;

const MOCK_HOST_KEY: &[u8] = b"mock-ed25519-host-key-blob";

struct MockBehavior {
    accept_password: bool,
    stdout: &'static [u8],
    exit_status: u32,
}

/// Runs the server side of a full session over `stream`.
async fn run_mock_server<S>(stream: S, behavior: MockBehavior) -> Result<(), SondeError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let mut transport = Transport::new(stream, Deadline::new(Duration::from_secs(10)));

    // Version exchange; send/recv ordering over a duplex does not matter.
    let ours = Version::new("MockServer_1.0", None);
    let theirs = transport.exchange_versions(&ours).await?;
    let client_line = format!("SSH-{}-{}", theirs.protocol(), theirs.software());
    let server_line = ours.to_line();

    // KEXINIT both ways.
    let server_kexinit = KexInit::new_client();
    let server_kexinit_bytes = server_kexinit.to_bytes();
    let client_kexinit_bytes = transport.recv_packet().await?;
    KexInit::from_bytes(&client_kexinit_bytes)?;
    transport.send_packet(&server_kexinit_bytes).await?;

    // curve25519 exchange with a real shared secret.
    let dh_init = KexDhInit::from_bytes(&transport.recv_packet().await?)?;
    let ephemeral = ClientKex::generate()?;
    let server_public = ephemeral.public_key.clone();
    let shared_secret = ephemeral.agree(&dh_init.public_key)?;

    let reply = KexDhReply {
        host_key: MOCK_HOST_KEY.to_vec(),
        public_key: server_public.clone(),
        signature: b"unverifiable-signature".to_vec(),
    };
    transport.send_packet(&reply.to_bytes()).await?;

    let exchange_hash = kex_dh::exchange_hash(
        &client_line,
        &server_line,
        &client_kexinit_bytes,
        &server_kexinit_bytes,
        MOCK_HOST_KEY,
        &dh_init.public_key,
        &server_public,
        &shared_secret,
    );
    let session_id = exchange_hash.clone();

    // NEWKEYS both ways, then mirrored key letters.
    transport
        .send_packet(&[MessageType::NewKeys.to_u8()])
        .await?;
    let newkeys = transport.recv_packet().await?;
    assert_eq!(newkeys, vec![MessageType::NewKeys.to_u8()]);

    let derive = |letter: u8, len: usize| {
        kex_dh::derive_key(&shared_secret, &exchange_hash, letter, &session_id, len)
    };
    let send = DirectionState {
        cipher: CipherState::new(&derive(b'D', CIPHER_KEY_LEN), &derive(b'B', CIPHER_IV_LEN))?,
        mac: MacState::new(&derive(b'F', MAC_KEY_LEN))?,
    };
    let recv = DirectionState {
        cipher: CipherState::new(&derive(b'C', CIPHER_KEY_LEN), &derive(b'A', CIPHER_IV_LEN))?,
        mac: MacState::new(&derive(b'E', MAC_KEY_LEN))?,
    };
    transport.enable_encryption(send, recv)?;

    // Service request, then password auth.
    let service = ServiceRequest::from_bytes(&transport.recv_packet().await?)?;
    assert_eq!(service.service, USERAUTH_SERVICE);
    let accept = ServiceAccept {
        service: USERAUTH_SERVICE.to_string(),
    };
    transport.send_packet(&accept.to_bytes()).await?;

    let auth_request = transport.recv_packet().await?;
    assert_eq!(auth_request[0], MessageType::UserauthRequest.to_u8());
    if behavior.accept_password {
        transport
            .send_packet(&[MessageType::UserauthSuccess.to_u8()])
            .await?;
    } else {
        let failure = AuthFailure {
            methods_that_can_continue: vec!["publickey".to_string()],
            partial_success: false,
        };
        transport.send_packet(&failure.to_bytes()).await?;
        return Ok(());
    }

    // Session channel.
    let open = ChannelOpen::from_bytes(&transport.recv_packet().await?)?;
    let confirmation = ChannelOpenConfirmation {
        recipient_channel: open.sender_channel,
        sender_channel: 7,
        initial_window: open.initial_window,
        max_packet: open.max_packet,
    };
    transport.send_packet(&confirmation.to_bytes()).await?;

    // Exec request, then output.
    let exec = ChannelRequest::from_bytes(&transport.recv_packet().await?)?;
    assert_eq!(exec.request_type, "exec");
    transport
        .send_packet(&recipient_only(
            MessageType::ChannelSuccess,
            open.sender_channel,
        ))
        .await?;

    let data = ChannelData {
        recipient_channel: open.sender_channel,
        data: behavior.stdout.to_vec(),
    };
    transport.send_packet(&data.to_bytes()).await?;

    let status = ChannelRequest::exit_status_message(open.sender_channel, behavior.exit_status);
    transport.send_packet(&status.to_bytes()).await?;
    transport
        .send_packet(&recipient_only(MessageType::ChannelEof, open.sender_channel))
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_full_session_echo_test() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(run_mock_server(
        server_end,
        MockBehavior {
            accept_password: true,
            stdout: b"test\n",
            exit_status: 0,
        },
    ));

    let mut client = SshClient::new(client_end, Deadline::new(Duration::from_secs(10)));
    client.handshake().await.unwrap();
    client.authenticate("probe", "secret").await.unwrap();
    let output = client.exec("echo test").await.unwrap();
    client.close().await.unwrap();

    assert_eq!(output.stdout, b"test\n");
    assert_eq!(output.exit_status, Some(0));
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rejected_password_surfaces_auth_failure() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(run_mock_server(
        server_end,
        MockBehavior {
            accept_password: false,
            stdout: b"",
            exit_status: 0,
        },
    ));

    let mut client = SshClient::new(client_end, Deadline::new(Duration::from_secs(10)));
    client.handshake().await.unwrap();
    let err = client.authenticate("probe", "wrong").await.unwrap_err();
    match err {
        SondeError::AuthenticationFailed(msg) => assert!(msg.contains("publickey")),
        other => panic!("expected AuthenticationFailed, got {:?}", other),
    }
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_nonzero_exit_status_reported() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(run_mock_server(
        server_end,
        MockBehavior {
            accept_password: true,
            stdout: b"",
            exit_status: 127,
        },
    ));

    let mut client = SshClient::new(client_end, Deadline::new(Duration::from_secs(10)));
    client.handshake().await.unwrap();
    client.authenticate("probe", "secret").await.unwrap();
    let output = client.exec("missing-command").await.unwrap();

    assert!(output.stdout.is_empty());
    assert_eq!(output.exit_status, Some(127));
    server.await.unwrap().unwrap();
}
