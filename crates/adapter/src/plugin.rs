//! Plugin wiring.
//!
//! Connects a [`FinalityService`] to a host: chain events and inbound
//! network payloads are stamped and pushed onto the worker queue; outbound
//! messages are framed and handed to the transport; finalization decisions
//! are forwarded to the host chain.

use crate::codec::{decode_message, encode_message};
use crate::config::{AdapterConfig, ConfigError};
use crate::host::{BlockState, HostChain, Transport};
use randpa_finality::{Channel, Config, Engine, FinalityService, OutboundMessage};
use randpa_messages::{
    AcceptedBlock, ChainEvent, IrreversibleBlock, NetMessage, NewPeer, RandpaMessage,
};
use randpa_types::{BlockId, SessionId};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, warn};

/// The RANDPA finality gadget, wired to a host.
pub struct RandpaPlugin<H, T> {
    host: Arc<H>,
    transport: Arc<T>,
    config: Config,
    adapter_config: AdapterConfig,
    service: Option<FinalityService>,
}

impl<H: HostChain + 'static, T: Transport + 'static> RandpaPlugin<H, T> {
    /// Initialize the plugin. Configuration errors are fatal here, before
    /// anything starts.
    pub fn new(
        host: Arc<H>,
        transport: Arc<T>,
        adapter_config: AdapterConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            host,
            transport,
            config: Config::default(),
            adapter_config,
            service: None,
        })
    }

    /// Seed the tree from the host fork database and start the worker.
    pub fn start(&mut self) {
        let tree = crate::bootstrap::seed_tree(self.host.as_ref());
        let engine = Engine::new(
            self.config.clone(),
            self.adapter_config.private_key.clone(),
            tree,
        );

        let mut out_net = Channel::new();
        let transport = Arc::clone(&self.transport);
        out_net.subscribe(move |out: &OutboundMessage| match encode_message(&out.message) {
            Ok((msg_type_id, payload)) => transport.send(out.session_id, msg_type_id, payload),
            Err(err) => error!(%err, "failed to encode outbound message"),
        });

        let mut finality = Channel::new();
        let host = Arc::clone(&self.host);
        finality.subscribe(move |block_id: &BlockId| {
            host.bft_finalize(block_id);
        });

        self.service = Some(FinalityService::start(
            engine,
            self.config.msg_expiration,
            Arc::new(out_net),
            Arc::new(finality),
        ));
        info!("randpa plugin started");
    }

    /// Terminate the worker, draining in-flight messages.
    pub fn stop(&mut self) {
        if let Some(mut service) = self.service.take() {
            service.stop();
        }
        info!("randpa plugin stopped");
    }

    /// Forward an accepted block, computing the sync flag from its age.
    pub fn on_accepted_block(&self, state: &BlockState) {
        let age = SystemTime::now()
            .duration_since(state.timestamp)
            .unwrap_or_default();
        let event = ChainEvent::AcceptedBlock(AcceptedBlock {
            block_id: state.block_id,
            prev_block_id: state.prev_block_id,
            creator_key: state.signing_key,
            active_bp_keys: state.active_schedule.clone(),
            sync: age > self.config.sync_age,
        });
        self.push(RandpaMessage::Event(event));
    }

    /// Forward an irreversible-block notification.
    pub fn on_irreversible_block(&self, block_id: BlockId) {
        self.push(RandpaMessage::Event(ChainEvent::IrreversibleBlock(
            IrreversibleBlock { block_id },
        )));
    }

    /// Forward a new peer session.
    pub fn on_new_peer(&self, session_id: SessionId) {
        self.push(RandpaMessage::Event(ChainEvent::NewPeer(NewPeer {
            session_id,
        })));
    }

    /// Decode and forward an inbound transport payload, stamping it with
    /// the receive time.
    pub fn on_net_message(&self, session_id: SessionId, msg_type_id: u32, payload: &[u8]) {
        match decode_message(msg_type_id, payload) {
            Ok(data) => self.push(RandpaMessage::Net(NetMessage::new(session_id, data))),
            Err(err) => warn!(%err, session = session_id, "dropping undecodable message"),
        }
    }

    fn push(&self, msg: RandpaMessage) {
        match &self.service {
            Some(service) => service.sender().push(msg),
            None => warn!("message dropped, plugin not started"),
        }
    }
}

impl<H, T> Drop for RandpaPlugin<H, T> {
    fn drop(&mut self) {
        if let Some(mut service) = self.service.take() {
            service.stop();
        }
    }
}
