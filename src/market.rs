// market.rs - Buyer/seller market over Contract Net
//
//! Buyers run the initiator role: each activation asks a random subset of
//! sellers for `quantity` units of a resource and accepts the first offer
//! within its price ceiling. Sellers run the participant role: they propose
//! their asking price while stock lasts and confirm accepted offers with
//! INFORM, or FAILURE if the stock went to another buyer in the meantime.
//!
//! Stock and money live in a [`MarketLedger`] shared by all strategies.

use crate::action::ActionState;
use crate::config::{ConfigError, MarketConfig, SimulationConfig};
use crate::context::AgentContext;
use crate::message::{AgentId, Message, Tick};
use crate::protocol::{
    select_uniform, AcceptReply, CallForProposals, CfpReply, ContentError, InitiatorPrototype,
    InitiatorSession, InitiatorStrategy, ParticipantPrototype, ParticipantStrategy, ProposalReply,
};
use crate::world::{World, WorldError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// CFP content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub resource: String,
    pub quantity: u32,
    pub max_price: u32,
}

/// PROPOSE content, echoed back in ACCEPT-PROPOSAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub resource: String,
    pub quantity: u32,
    pub unit_price: u32,
}

/// INFORM content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub resource: String,
    pub quantity: u32,
    pub total_price: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRole {
    Buyer,
    Seller,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub role: MarketRole,
    pub stock: u32,
    pub ask: u32,
    pub bought: u32,
    pub sold: u32,
    pub spent: u64,
    pub earned: u64,
    /// Accepted offers that were not fulfilled
    pub failures: u32,
}

impl Account {
    fn new(role: MarketRole, stock: u32, ask: u32) -> Self {
        Self {
            role,
            stock,
            ask,
            bought: 0,
            sold: 0,
            spent: 0,
            earned: 0,
            failures: 0,
        }
    }
}

/// Stock and money of every market participant
#[derive(Debug, Default)]
pub struct MarketLedger {
    accounts: HashMap<AgentId, Account>,
}

pub type SharedLedger = Arc<Mutex<MarketLedger>>;

impl MarketLedger {
    pub fn open_seller(&mut self, id: AgentId, stock: u32, ask: u32) {
        self.accounts.insert(id, Account::new(MarketRole::Seller, stock, ask));
    }

    pub fn open_buyer(&mut self, id: AgentId) {
        self.accounts.insert(id, Account::new(MarketRole::Buyer, 0, 0));
    }

    pub fn account(&self, id: &AgentId) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn is_seller(&self, id: &AgentId) -> bool {
        matches!(self.accounts.get(id), Some(a) if a.role == MarketRole::Seller)
    }

    /// Take `quantity` units out of a seller's stock at its asking price.
    /// Returns the total price, or `None` when the stock is short.
    pub fn sell(&mut self, seller: &AgentId, quantity: u32) -> Option<u64> {
        let account = self.accounts.get_mut(seller)?;
        if account.stock < quantity {
            return None;
        }
        let total = u64::from(quantity) * u64::from(account.ask);
        account.stock -= quantity;
        account.sold += quantity;
        account.earned += total;
        Some(total)
    }

    pub fn record_purchase(&mut self, buyer: &AgentId, quantity: u32, total: u64) {
        if let Some(account) = self.accounts.get_mut(buyer) {
            account.bought += quantity;
            account.spent += total;
        }
    }

    pub fn record_failure(&mut self, buyer: &AgentId) {
        if let Some(account) = self.accounts.get_mut(buyer) {
            account.failures += 1;
        }
    }

    pub fn total_stock(&self) -> u64 {
        self.accounts.values().map(|a| u64::from(a.stock)).sum()
    }

    pub fn total_sold(&self) -> u64 {
        self.accounts.values().map(|a| u64::from(a.sold)).sum()
    }

    pub fn total_bought(&self) -> u64 {
        self.accounts.values().map(|a| u64::from(a.bought)).sum()
    }
}

/// Initiator strategy of a buyer
#[derive(Debug)]
pub struct BuyerStrategy {
    market: MarketConfig,
    ledger: SharedLedger,
}

impl BuyerStrategy {
    pub fn new(market: MarketConfig, ledger: SharedLedger) -> Self {
        Self { market, ledger }
    }
}

impl InitiatorStrategy for BuyerStrategy {
    fn call_for_proposals(&self, ctx: &mut dyn AgentContext) -> CallForProposals {
        let sellers: Vec<AgentId> = {
            let ledger = self.ledger.lock();
            ctx.peers().into_iter().filter(|p| ledger.is_seller(p)).collect()
        };
        let recipients = select_uniform(&sellers, self.market.fan_out, ctx.rng());
        debug!(candidates = sellers.len(), picked = recipients.len(), "Sellers selected");

        CallForProposals {
            recipients,
            payload: json!(PurchaseRequest {
                resource: self.market.resource.clone(),
                quantity: self.market.quantity,
                max_price: self.market.max_price,
            }),
        }
    }

    fn evaluate_proposal(
        &self,
        _me: &AgentId,
        proposal: &Message,
        session: &InitiatorSession,
    ) -> Result<ProposalReply, ContentError> {
        let offer: Offer = proposal.decode()?;
        if offer.resource != self.market.resource {
            return Err(ContentError::Invalid(format!("offered {}, asked for {}", offer.resource, self.market.resource)));
        }

        if session.accepted() > 0 {
            Ok(ProposalReply::Reject(json!({ "reason": "already supplied" })))
        } else if offer.unit_price > self.market.max_price {
            Ok(ProposalReply::Reject(json!({ "reason": "too expensive" })))
        } else {
            Ok(ProposalReply::Accept(json!(offer)))
        }
    }

    fn on_inform(&self, me: &AgentId, inform: &Message) {
        match inform.decode::<Delivery>() {
            Ok(delivery) => {
                info!(
                    seller = %inform.sender(),
                    quantity = delivery.quantity,
                    total_price = delivery.total_price,
                    "Purchase completed"
                );
                self.ledger.lock().record_purchase(me, delivery.quantity, delivery.total_price);
            }
            Err(err) => warn!(seller = %inform.sender(), error = %err, "Unreadable delivery note"),
        }
    }

    fn on_failure(&self, me: &AgentId, reply: &Message) {
        debug!(seller = %reply.sender(), "Purchase fell through");
        self.ledger.lock().record_failure(me);
    }
}

/// Participant strategy of a seller
#[derive(Debug)]
pub struct SellerStrategy {
    resource: String,
    ledger: SharedLedger,
}

impl SellerStrategy {
    pub fn new(resource: impl Into<String>, ledger: SharedLedger) -> Self {
        Self {
            resource: resource.into(),
            ledger,
        }
    }
}

impl ParticipantStrategy for SellerStrategy {
    fn respond_to_cfp(&self, me: &AgentId, cfp: &Message) -> Result<CfpReply, ContentError> {
        let request: PurchaseRequest = cfp.decode()?;
        if request.resource != self.resource {
            return Ok(CfpReply::Refuse(json!({ "reason": "not traded here" })));
        }

        let ledger = self.ledger.lock();
        let account = ledger
            .account(me)
            .ok_or_else(|| ContentError::Invalid(format!("{} has no account", me)))?;
        if account.stock < request.quantity {
            return Ok(CfpReply::Refuse(json!({ "reason": "out of stock", "stock": account.stock })));
        }
        Ok(CfpReply::Propose(json!(Offer {
            resource: request.resource,
            quantity: request.quantity,
            unit_price: account.ask,
        })))
    }

    fn respond_to_accept(&self, me: &AgentId, accept: &Message) -> Result<AcceptReply, ContentError> {
        let offer: Offer = accept.decode()?;
        match self.ledger.lock().sell(me, offer.quantity) {
            Some(total_price) => {
                debug!(buyer = %accept.sender(), quantity = offer.quantity, total_price, "Sold");
                Ok(AcceptReply::Inform(json!(Delivery {
                    resource: offer.resource,
                    quantity: offer.quantity,
                    total_price,
                })))
            }
            None => Ok(AcceptReply::Failure(json!({ "reason": "sold out" }))),
        }
    }
}

/// Per-agent line of a market report
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub agent: AgentId,
    pub state: ActionState,
    pub completions: u64,
    pub last_end: Option<String>,
    pub account: Option<Account>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub tick: Tick,
    pub agents: Vec<AgentReport>,
    /// Delivered messages by performative
    pub messages: BTreeMap<String, usize>,
}

/// Market construction errors
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    World(#[from] WorldError),
}

/// A populated world with its ledger
#[derive(Debug)]
pub struct Market {
    world: World,
    ledger: SharedLedger,
}

impl Market {
    /// Buyers are registered before sellers, so a seller sees a CFP in the
    /// tick it was sent.
    pub fn build(config: &SimulationConfig) -> Result<Self, MarketError> {
        config.validate()?;
        let market = &config.market;
        let ledger: SharedLedger = Arc::new(Mutex::new(MarketLedger::default()));
        let mut world = World::from_config(&config.world);

        let buyers = InitiatorPrototype::new(
            config.negotiation.clone(),
            Arc::new(BuyerStrategy::new(market.clone(), ledger.clone())),
        );
        let sellers = ParticipantPrototype::new(
            config.negotiation.clone(),
            Arc::new(SellerStrategy::new(market.resource.as_str(), ledger.clone())),
        );

        for i in 0..market.buyers {
            let id = AgentId::new(format!("buyer-{}", i));
            ledger.lock().open_buyer(id.clone());
            world.add_agent(id, Box::new(buyers.instantiate("buy")))?;
        }
        for i in 0..market.sellers {
            let id = AgentId::new(format!("seller-{}", i));
            let ask = spread(market.min_ask, market.max_ask, i, market.sellers);
            ledger.lock().open_seller(id.clone(), market.stock, ask);
            world.add_agent(id, Box::new(sellers.instantiate("sell")))?;
        }

        info!(buyers = market.buyers, sellers = market.sellers, resource = %market.resource, "Market opened");
        Ok(Self { world, ledger })
    }

    pub fn run(&mut self, ticks: u64) -> Result<Tick, WorldError> {
        self.world.run(ticks)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    pub fn summary(&self) -> MarketSummary {
        let ledger = self.ledger.lock();
        let agents = self
            .world
            .agent_ids()
            .iter()
            .filter_map(|id| {
                let action = self.world.action(id)?;
                Some(AgentReport {
                    agent: id.clone(),
                    state: action.state(),
                    completions: action.completion_count(),
                    last_end: action.end_label(),
                    account: ledger.account(id).cloned(),
                })
            })
            .collect();

        let mut messages = BTreeMap::new();
        for entry in self.world.post_office().log().entries() {
            *messages
                .entry(entry.message.performative().to_string())
                .or_insert(0) += 1;
        }

        MarketSummary {
            tick: self.world.current_tick(),
            agents,
            messages,
        }
    }
}

/// `i`-th of `n` values spread evenly over `min..=max`
fn spread(min: u32, max: u32, i: usize, n: usize) -> u32 {
    if n <= 1 {
        return min;
    }
    let step = u64::from(max.saturating_sub(min)) * i as u64 / (n as u64 - 1);
    min + step as u32
}
