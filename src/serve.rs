use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::chat::{self, Translation};
use crate::connection::{ClientHandle, Outbound, Session};
use crate::crypto::StreamCipher;
use crate::err::ProtError;
use crate::jobs::Job;
use crate::packets::client::ClientPackets;
use crate::packets::frame::Frame;
use crate::packets::parse::parse_packet;
use crate::protocol_types::traits::{HandlePacket, WriteProtPacket};
use crate::Server;

/// Bytes read from the socket at a time.
const MAX_RECEIVE: usize = 32 * 1024;
/// How long teardown waits for queued packets to drain.
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Accepts connections until the task is aborted, which drops the listener.
pub(crate) async fn accept_loop(server: Arc<Server>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, address)) => spawn_connection(&server, stream, address),
            Err(e) => error!("Couldn't accept connection: {e}"),
        }
    }
}

/**
 * Every connection gets two tasks:
 * - the writer, which owns the write half and the encrypt cipher and drains the outbound queue,
 * - the session task, which reads and handles packets and tears the connection down at the end.
 */
pub(crate) fn spawn_connection(server: &Arc<Server>, stream: TcpStream, address: SocketAddr) {
    let (handle, outbound) = server.registry.register(address);
    info!("New connection: {address} ({} open)", server.registry.len());
    let (read, write) = stream.into_split();
    let writer = tokio::spawn(run_writer(handle.clone(), write, outbound));
    let id = handle.id();
    let task = {
        let server = server.clone();
        tokio::spawn(async move {
            let session = run_session(&server, handle, read).await;
            teardown(&server, session, writer).await;
        })
    };
    server.registry.attach_task(id, task);
}

async fn run_writer(
    handle: Arc<ClientHandle>,
    mut write: OwnedWriteHalf,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    let mut encrypter: Option<StreamCipher> = None;
    while let Some(message) = outbound.recv().await {
        let result = match message {
            Outbound::Packet(packet) => write_packet(&mut write, encrypter.as_mut(), packet).await,
            Outbound::EnableEncryption(cipher) => {
                encrypter = Some(cipher);
                Ok(())
            }
            Outbound::Close => break,
        };
        if let Err(e) = result {
            debug!("{}: couldn't send packet: {e}", handle.address());
            handle.disconnect();
            break;
        }
    }
    let _ = write.shutdown().await;
}

async fn write_packet(
    write: &mut OwnedWriteHalf,
    encrypter: Option<&mut StreamCipher>,
    packet: ClientPackets,
) -> Result<(), ProtError> {
    let mut bytes = packet.encode().await?;
    if let Some(cipher) = encrypter {
        cipher.apply(&mut bytes)?;
    }
    write.write_all(&bytes).await?;
    Ok(())
}

/**
 * Reads from the socket until the peer goes away, a packet fails, or another worker asks for
 * a disconnect. Returns the session for teardown.
 */
async fn run_session(server: &Arc<Server>, handle: Arc<ClientHandle>, mut read: OwnedReadHalf) -> Session {
    let address = handle.address();
    let mut session = Session::new(handle.clone());
    let mut buf = vec![0u8; MAX_RECEIVE];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let received = tokio::select! {
            _ = handle.closed() => break,
            result = read.read(&mut buf) => match result {
                Ok(0) => {
                    info!("Connection {address} closed.");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!("Connection {address} failed: {e}");
                    break;
                }
            },
        };
        let result = receive(server, &mut session, &mut pending, &mut buf[..received]).await;
        if let Err(e) = result {
            if e.is_external() {
                warn!("{}: {e}", handle.name());
            } else {
                error!("Couldn't handle packet from {}: {e}", handle.name());
            }
            break;
        }
    }
    session
}

/// Decrypts freshly read bytes and handles every complete frame they finish.
async fn receive(
    server: &Arc<Server>,
    session: &mut Session,
    pending: &mut Vec<u8>,
    received: &mut [u8],
) -> Result<(), ProtError> {
    if let Some(decrypter) = session.decrypter.as_mut() {
        decrypter.apply(received)?;
    }
    pending.extend_from_slice(received);

    let mut offset = 0;
    while let Some((frame, used)) = Frame::decode(&pending[offset..])? {
        offset += used;
        let encrypted = session.decrypter.is_some();
        handle_frame(server, session, &frame).await?;
        if !encrypted {
            // encryption starts right after the packet that enabled it
            if let Some(decrypter) = session.decrypter.as_mut() {
                decrypter.apply(&mut pending[offset..])?;
            }
        }
        if session.handle.is_closing() {
            break;
        }
    }
    pending.drain(..offset);
    Ok(())
}

async fn handle_frame(
    server: &Arc<Server>,
    session: &mut Session,
    frame: &Frame,
) -> Result<(), ProtError> {
    let packet = parse_packet(session.state(), frame).await?;
    if server.config.log_packets {
        debug!("{} Inbound packet: {packet:?}", session.handle.address());
    }
    packet.handle(session, server).await
}

/// Releases everything the connection holds. Runs once, on the connection's own task.
async fn teardown(server: &Server, session: Session, writer: JoinHandle<()>) {
    let handle = session.handle.clone();
    let id = handle.id();
    if !server.registry.begin_teardown(id) {
        return;
    }
    // closing first, so a timer installed concurrently is refused or cancelled here
    handle.disconnect();
    handle.cancel_keep_alive();

    if session.joined && server.registry.leave(id).is_some() {
        if let Some(profile) = handle.profile() {
            server.jobs.push(Job::PlayerLeft {
                uuid: profile.uuid,
                username: profile.username.clone(),
            });
        }
    }
    if let Some(entity) = &session.entity {
        entity.release(&server.world);
    }

    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_GRACE, writer).await.is_err() {
        abort.abort();
    }
    server.registry.remove(id);
    drop(session);
    info!("{} disconnected", handle.name());
}

/// Disconnects every connection with a shutdown message and waits for their workers.
pub(crate) async fn shutdown(server: &Server) {
    let clients = server.registry.drain_tasks();
    info!("Disconnecting {} connections", clients.len());
    let reason = Translation::new(chat::SERVER_SHUTDOWN);
    for (handle, task) in clients {
        handle.disconnect_with(&reason);
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Worker of {} failed: {e}", handle.name());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use openssl::rsa::{Padding, Rsa};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::crypto::CipherPair;
    use crate::packets::{PROTOCOL_VERSION, VERSION_NAME};
    use crate::protocol_types::primitives::{SizedVec, VarInt};
    use crate::protocol_types::traits::{ReadProt, WriteProt};
    use crate::protocol_util::name_uuid;
    use crate::test_server;

    fn frame(id: i32, payload: Vec<u8>) -> Vec<u8> {
        Frame::new(VarInt::from(id), payload).encode()
    }

    async fn read_frame(stream: &mut TcpStream, decrypt: Option<&mut StreamCipher>) -> Frame {
        let mut bytes = vec![];
        let mut decrypt = decrypt;
        loop {
            if let Some((frame, _)) = Frame::decode(&bytes).unwrap() {
                return frame;
            }
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await.unwrap();
            if let Some(cipher) = decrypt.as_mut() {
                cipher.apply(&mut byte).unwrap();
            }
            bytes.push(byte[0]);
        }
    }

    async fn connect(server: &Arc<Server>) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(server.clone(), listener));
        TcpStream::connect(address).await.unwrap()
    }

    async fn handshake(stream: &mut TcpStream, protocol: i32, next_state: i32) {
        let mut payload = vec![];
        VarInt::from(protocol).write(&mut payload).await.unwrap();
        String::from("localhost").write(&mut payload).await.unwrap();
        25565u16.write(&mut payload).await.unwrap();
        VarInt::from(next_state).write(&mut payload).await.unwrap();
        stream.write_all(&frame(0x00, payload)).await.unwrap();
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn status_and_ping_in_one_read() {
        let (server, _jobs) = test_server();
        let mut stream = connect(&server).await;

        let mut bytes = vec![];
        let mut payload = vec![];
        VarInt::from(PROTOCOL_VERSION).write(&mut payload).await.unwrap();
        String::from("localhost").write(&mut payload).await.unwrap();
        25565u16.write(&mut payload).await.unwrap();
        VarInt::from(1).write(&mut payload).await.unwrap();
        bytes.extend(frame(0x00, payload));
        bytes.extend(frame(0x00, vec![]));
        bytes.extend(frame(0x01, 42i64.to_be_bytes().to_vec()));
        stream.write_all(&bytes).await.unwrap();

        let status = read_frame(&mut stream, None).await;
        assert_eq!(status.id.value, 0x00);
        let json = String::from_utf8_lossy(&status.payload).to_string();
        assert!(json.contains(VERSION_NAME));
        let pong = read_frame(&mut stream, None).await;
        assert_eq!(pong.id.value, 0x01);
        assert_eq!(pong.payload, 42i64.to_be_bytes().to_vec());
    }

    #[tokio::test]
    async fn unknown_packet_closes_the_connection() {
        let (server, _jobs) = test_server();
        let mut stream = connect(&server).await;
        wait_for(|| server.registry.len() == 1).await;
        stream.write_all(&frame(0x42, vec![])).await.unwrap();
        let mut rest = vec![];
        let read = stream.read_to_end(&mut rest).await.unwrap_or(0);
        assert_eq!(read, 0);
        wait_for(|| server.registry.len() == 0).await;
    }

    #[tokio::test]
    async fn offline_login_over_tcp() {
        let (server, _jobs) = test_server();
        let mut stream = connect(&server).await;
        handshake(&mut stream, PROTOCOL_VERSION, 2).await;
        let mut name = vec![];
        String::from("Notch").write(&mut name).await.unwrap();
        stream.write_all(&frame(0x00, name)).await.unwrap();

        let request = read_frame(&mut stream, None).await;
        assert_eq!(request.id.value, 0x01);
        let mut body: &[u8] = &request.payload;
        let server_id = String::read(&mut body).await.unwrap();
        assert_eq!(server_id, "-");
        let public_key = SizedVec::<u8>::read(&mut body).await.unwrap();
        let token = SizedVec::<u8>::read(&mut body).await.unwrap();

        let secret = *b"fedcba9876543210";
        let rsa = Rsa::public_key_from_der(&public_key.vec).unwrap();
        let encrypt = |data: &[u8]| {
            let mut out = vec![0; rsa.size() as usize];
            let len = rsa.public_encrypt(data, &mut out, Padding::PKCS1).unwrap();
            out.truncate(len);
            out
        };
        let mut payload = vec![];
        SizedVec::from(encrypt(&secret))
            .write(&mut payload)
            .await
            .unwrap();
        SizedVec::from(encrypt(&token.vec))
            .write(&mut payload)
            .await
            .unwrap();
        stream.write_all(&frame(0x01, payload)).await.unwrap();

        let CipherPair {
            mut encrypt,
            mut decrypt,
        } = CipherPair::new(&secret).unwrap();
        let success = read_frame(&mut stream, Some(&mut decrypt)).await;
        assert_eq!(success.id.value, 0x02);
        assert_eq!(
            &success.payload[..16],
            &name_uuid("OfflinePlayer:Notch").as_u128().to_be_bytes()
        );
        let look = read_frame(&mut stream, Some(&mut decrypt)).await;
        assert_eq!(look.id.value, 0x38);

        wait_for(|| server.registry.online_count() == 1).await;

        // encrypted serverbound traffic: confirm the teleport
        let mut confirm = frame(0x00, vec![1]);
        encrypt.apply(&mut confirm).unwrap();
        stream.write_all(&confirm).await.unwrap();

        drop(stream);
        wait_for(|| server.registry.online_count() == 0 && server.registry.len() == 0).await;
    }

    #[tokio::test]
    async fn teardown_of_unjoined_login_announces_nothing() {
        let (server, mut jobs) = test_server();
        let (handle, _rx) = server
            .registry
            .register(SocketAddr::from(([127, 0, 0, 1], 6000)));
        let mut session = Session::new(handle.clone());
        session.set_profile(crate::auth::Profile {
            uuid: name_uuid("OfflinePlayer:Notch"),
            username: "Notch".into(),
            textures: None,
        });
        session.entity = Some(crate::entity::Entity::spawn(
            &server.world,
            crate::entity::Position::new(0.0, 64.0, 0.0),
        ));
        let timer = tokio::spawn(std::future::pending::<()>());
        handle.set_keep_alive(timer.abort_handle());
        assert!(!session.joined);

        teardown(&server, session, tokio::spawn(async {})).await;
        assert!(timer.await.unwrap_err().is_cancelled());
        assert!(handle.is_closing());
        assert_eq!(server.registry.len(), 0);
        let chunk = server.world.chunk(crate::chunk::ChunkPos::new(0, 0)).unwrap();
        assert!(chunk.entities().is_empty());
        assert!(jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_disconnects_everyone() {
        let (server, _jobs) = test_server();
        let mut stream = connect(&server).await;
        handshake(&mut stream, PROTOCOL_VERSION, 2).await;
        let mut name = vec![];
        String::from("Notch").write(&mut name).await.unwrap();
        stream.write_all(&frame(0x00, name)).await.unwrap();
        // the encryption request proves the session is in the login state
        assert_eq!(read_frame(&mut stream, None).await.id.value, 0x01);
        shutdown(&server).await;
        assert_eq!(server.registry.len(), 0);
        let mut rest = vec![];
        let _ = stream.read_to_end(&mut rest).await;
        let (disconnect, _) = Frame::decode(&rest).unwrap().unwrap();
        assert_eq!(disconnect.id.value, 0x00);
        assert!(String::from_utf8_lossy(&disconnect.payload).contains(chat::SERVER_SHUTDOWN));
    }
}
