//! Wire messages and the length-prefixed frame that carries them.
//!
//! Frame format: `[4-byte LE payload_len][payload_len bytes of UTF-8 JSON]`,
//! where the JSON is `{"Type": .., "Data": .., "Sender": ..}` and `Data` is
//! itself JSON text (a block, a transaction, or an array of blocks).

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{FRAME_HEADER_SIZE, MAX_FRAME_BYTES};
use crate::error::{NodeError, Result};

/// An encoded frame, shared between every peer it is sent to.
pub type Frame = Arc<Vec<u8>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    NewBlock,
    NewTransaction,
    SyncChain,
    ChainResponse,
    /// Accepted by the framing layer, ignored by dispatch.
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::NewBlock => "NEW_BLOCK",
            MessageType::NewTransaction => "NEW_TRANSACTION",
            MessageType::SyncChain => "SYNC_CHAIN",
            MessageType::ChainResponse => "CHAIN_RESPONSE",
            MessageType::Unknown(other) => other,
        }
    }

    /// Types that are flooded to other peers and therefore de-duplicated.
    pub fn is_gossip(&self) -> bool {
        matches!(self, MessageType::NewBlock | MessageType::NewTransaction)
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "NEW_BLOCK" => MessageType::NewBlock,
            "NEW_TRANSACTION" => MessageType::NewTransaction,
            "SYNC_CHAIN" => MessageType::SyncChain,
            "CHAIN_RESPONSE" => MessageType::ChainResponse,
            _ => MessageType::Unknown(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(rename = "Type")]
    pub kind: MessageType,
    pub data: String,
    pub sender: String,
}

impl Message {
    pub fn new(kind: MessageType, data: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            sender: sender.into(),
        }
    }

    pub fn new_block(block: &Block, sender: &str) -> Result<Self> {
        Ok(Self::new(
            MessageType::NewBlock,
            serde_json::to_string(block)?,
            sender,
        ))
    }

    pub fn new_transaction(tx: &Transaction, sender: &str) -> Result<Self> {
        Ok(Self::new(
            MessageType::NewTransaction,
            serde_json::to_string(tx)?,
            sender,
        ))
    }

    pub fn sync_chain(sender: &str) -> Self {
        Self::new(MessageType::SyncChain, "", sender)
    }

    pub fn chain_response(chain: &[Block], sender: &str) -> Result<Self> {
        Ok(Self::new(
            MessageType::ChainResponse,
            serde_json::to_string(chain)?,
            sender,
        ))
    }

    /// De-duplication key: type, data and sender.
    pub fn id(&self) -> String {
        format!("{}-{}-{}", self.kind, self.data, self.sender)
    }

    pub fn block(&self) -> Result<Block> {
        Ok(serde_json::from_str(&self.data)?)
    }

    pub fn transaction(&self) -> Result<Transaction> {
        Ok(serde_json::from_str(&self.data)?)
    }

    pub fn chain(&self) -> Result<Vec<Block>> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

pub fn encode_frame(msg: &Message) -> Result<Frame> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(NodeError::FrameTooLarge(payload.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(Arc::new(frame))
}

pub fn decode_payload(payload: &[u8]) -> Result<Message> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read one frame's payload. `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(NodeError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::chain::genesis_block;
    use tokio::io::duplex;

    #[test]
    fn message_type_strings() {
        for (kind, text) in [
            (MessageType::NewBlock, "NEW_BLOCK"),
            (MessageType::NewTransaction, "NEW_TRANSACTION"),
            (MessageType::SyncChain, "SYNC_CHAIN"),
            (MessageType::ChainResponse, "CHAIN_RESPONSE"),
        ] {
            assert_eq!(kind.as_str(), text);
            assert_eq!(MessageType::from(text.to_string()), kind);
        }
        assert_eq!(
            MessageType::from("new_block".to_string()),
            MessageType::Unknown("new_block".into())
        );
    }

    #[test]
    fn only_flooded_types_are_gossip() {
        assert!(MessageType::NewBlock.is_gossip());
        assert!(MessageType::NewTransaction.is_gossip());
        assert!(!MessageType::SyncChain.is_gossip());
        assert!(!MessageType::ChainResponse.is_gossip());
        assert!(!MessageType::Unknown("PING".into()).is_gossip());
    }

    #[test]
    fn message_json_layout() {
        let msg = Message::sync_chain("Node A");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"Type":"SYNC_CHAIN","Data":"","Sender":"Node A"}"#);
    }

    #[test]
    fn unknown_type_survives_decoding() {
        let msg = decode_payload(br#"{"Type":"PING","Data":"x","Sender":"n"}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown("PING".into()));
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"Type":"PING","Data":"x","Sender":"n"}"#);
    }

    #[test]
    fn data_carries_nested_json() {
        let genesis = genesis_block();
        let msg = Message::chain_response(&[genesis.clone()], "a").unwrap();
        assert!(msg.data.starts_with("[{\"Index\":0"));
        assert_eq!(msg.chain().unwrap(), vec![genesis.clone()]);

        let msg = Message::new_block(&genesis, "a").unwrap();
        assert_eq!(msg.block().unwrap(), genesis);
        assert!(msg.transaction().is_err());
    }

    #[test]
    fn message_id_covers_type_data_and_sender() {
        let a = Message::new(MessageType::NewBlock, "{}", "a");
        let b = Message::new(MessageType::NewBlock, "{}", "b");
        let c = Message::new(MessageType::NewTransaction, "{}", "a");
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn frame_header_is_little_endian_length() {
        let msg = Message::sync_chain("n");
        let frame = encode_frame(&msg).unwrap();
        let payload = serde_json::to_vec(&msg).unwrap();
        assert_eq!(&frame[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&frame[4..], &payload[..]);
    }

    #[tokio::test]
    async fn frames_cross_a_stream_in_order() {
        let (mut client, mut server) = duplex(64);
        let first = Message::new_block(&genesis_block(), "a").unwrap();
        let second = Message::sync_chain("a");
        let sent = vec![first.clone(), second.clone()];

        let writer = tokio::spawn(async move {
            for msg in &sent {
                write_frame(&mut client, msg).await.unwrap();
            }
        });

        // The duplex buffer is smaller than a block frame, so reads come back short.
        let got1 = read_frame(&mut server).await.unwrap().unwrap();
        let got2 = read_frame(&mut server).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(decode_payload(&got1).unwrap(), first);
        assert_eq!(decode_payload(&got2).unwrap(), second);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut client, mut server) = duplex(64);
        client
            .write_all(&((MAX_FRAME_BYTES as u32) + 1).to_le_bytes())
            .await
            .unwrap();
        match read_frame(&mut server).await {
            Err(NodeError::FrameTooLarge(len)) => assert_eq!(len, MAX_FRAME_BYTES + 1),
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_payload_is_an_error() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        assert!(matches!(read_frame(&mut server).await, Err(NodeError::Io(_))));
    }
}
