use std::sync::Arc;

use log::trace;

use crate::download::DownloadManager;
use crate::error::Result;
use crate::message::Message;
use crate::peer::{ConnectionManager, Peer};

/// Applies the messages of one connection to the peer and the client.
pub struct Dispatcher {
    peer: Arc<Peer>,
    downloads: DownloadManager,
}

impl Dispatcher {
    pub fn new(manager: ConnectionManager, peer: Arc<Peer>) -> Self {
        let downloads = DownloadManager::new(Arc::clone(manager.shared()));
        Self { peer, downloads }
    }

    pub async fn apply(&self, message: Message) -> Result<()> {
        match message {
            Message::KeepAlive => trace!("[{}] keep-alive", self.peer.addr),
            Message::Choke => self.peer.set_peer_choking(true),
            Message::Unchoke => self.peer.set_peer_choking(false),
            Message::Interested => self.peer.set_peer_interested(true),
            Message::NotInterested => self.peer.set_peer_interested(false),
            Message::Have(index) => {
                self.peer.set_has_piece(index)?;
                self.declare_interest();
            }
            Message::Bitfield(bitfield) => {
                self.peer.set_bitfield(bitfield);
                self.declare_interest();
            }
            Message::Request(block) => self.downloads.send_block(&self.peer, block),
            Message::Piece(data) => self.downloads.save_block(self.peer.addr, data).await,
            // requests are answered as soon as they arrive
            Message::Cancel(block) => trace!("[{}] cancel {:?}", self.peer.addr, block),
        }
        Ok(())
    }

    fn declare_interest(&self) {
        let owned = self.downloads.bitmap();
        if self.peer.has_any_missing(&owned) && self.peer.mark_interested() {
            self.peer.try_send(Message::Interested);
        }
    }
}
