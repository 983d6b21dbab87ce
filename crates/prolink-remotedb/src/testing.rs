//! In-process database server for tests.

use crate::codec::MessageCodec;
use crate::connection::Connection;
use crate::fields::Field;
use crate::message::{Message, MessageType};
use futures::{SinkExt, StreamExt};
use prolink_core::config::RemoteDbConfig;
use prolink_core::types::{Device, DeviceType};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub(crate) fn test_device() -> Device {
    Device {
        id: 3,
        device_type: DeviceType::Cdj,
        name: "CDJ-3000".to_string(),
        ip: Ipv4Addr::LOCALHOST,
        mac_addr: [0x00, 0xe0, 0x36, 0x01, 0x02, 0x03],
    }
}

/// What the server saw
#[derive(Debug, Default)]
pub(crate) struct ServerLog {
    pub setup_host_id: Option<u32>,
    pub requests: Vec<Message>,
}

pub(crate) struct FakeServer {
    task: JoinHandle<ServerLog>,
}

impl FakeServer {
    /// Waits for the client to hang up and returns the log
    pub async fn finish(self) -> ServerLog {
        self.task.await.unwrap()
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

pub(crate) struct FakeDatabase;

impl FakeDatabase {
    /// Connects a client to a server answering requests with `handler`
    pub async fn start<F>(handler: F) -> (Connection, FakeServer)
    where
        F: FnMut(&Message, u32) -> Vec<Message> + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(serve(server, handler));

        let conn = Connection::establish(client, test_device(), &RemoteDbConfig::default())
            .await
            .unwrap();

        (conn, FakeServer { task })
    }
}

/// Runs the server side of a session until the client disconnects
pub(crate) async fn serve<S, F>(mut stream: S, mut handler: F) -> ServerLog
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    F: FnMut(&Message, u32) -> Vec<Message> + Send,
{
    let mut log = ServerLog::default();

    let mut greeting = [0u8; 5];
    if stream.read_exact(&mut greeting).await.is_err() {
        return log;
    }
    stream.write_all(&greeting).await.unwrap();

    let mut framed = Framed::new(stream, MessageCodec);

    if let Some(Ok(setup)) = framed.next().await {
        assert_eq!(setup.kind, MessageType::Setup);
        log.setup_host_id = setup.args.first().and_then(Field::as_u32);
        framed
            .send(Message::new(
                setup.transaction_id,
                MessageType::Success,
                vec![Field::UInt32(0), Field::UInt32(0x11)],
            ))
            .await
            .unwrap();
    }

    while let Some(Ok(request)) = framed.next().await {
        let responses = handler(&request, request.transaction_id);
        log.requests.push(request);
        for response in responses {
            if framed.send(response).await.is_err() {
                return log;
            }
        }
    }

    log
}

/// Serves lookups with the item count and RenderMenu requests with the
/// requested slice of `items`.
pub(crate) fn menu_responder(items: Vec<Message>) -> impl FnMut(&Message, u32) -> Vec<Message> + Send {
    move |request, txid| match request.kind {
        MessageType::RenderMenu => {
            let offset = request.u32_arg(1).unwrap() as usize;
            let count = request.u32_arg(2).unwrap() as usize;

            let mut responses = vec![Message::new(txid, MessageType::MenuHeader, vec![])];
            for item in &items[offset..offset + count] {
                let mut item = item.clone();
                item.transaction_id = txid;
                responses.push(item);
            }
            responses.push(Message::new(txid, MessageType::MenuFooter, vec![]));
            responses
        }
        kind => vec![Message::new(
            txid,
            MessageType::Success,
            vec![Field::UInt32(kind.as_u16() as u32), Field::UInt32(items.len() as u32)],
        )],
    }
}
