//! FIFO trade pairing
//!
//! Reconstructs round trips from individual fills. Each token keeps two
//! queues of unmatched lots (buys and sells); a match always takes the earliest
//! lot of each side and consumes `min(remaining)` from both.
//!
//! ## Streaming and cursor safety
//!
//! Fills arrive in id-ordered batches. Nothing about open lots is persisted, so
//! a run may only advance its cursor to a *balance point*: an id at which every
//! token's queues are empty and every fill at or below that id has been
//! consumed. Resuming after a balance point rebuilds the exact same state from
//! source, and the closed trades it re-emits are absorbed by row-hash dedup.
//!
//! Lots are queued at their (timestamp, id) position, not at arrival, so a
//! fill with an early timestamp in a later batch still pairs in time order as
//! long as no later lot of its token has been matched yet. When one has, the
//! fill is paired as it arrives and reported as a data-quality issue.

use super::error::PipelineError;
use super::types::{profit_percentage, FillSide, Outcome, SourceFill};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Quantities within this distance are considered equal
pub const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Closed,
    Open,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Closed => "closed",
            MatchStatus::Open => "open",
        }
    }
}

/// Data-quality markers for records that need a human look
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewFlag {
    /// Sell quantity that never met a buy
    OrphanSell,
}

impl ReviewFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewFlag::OrphanSell => "orphan_sell",
        }
    }
}

/// One side of a match
#[derive(Debug, Clone, PartialEq)]
pub struct LegSummary {
    pub source_id: i64,
    pub amount: f64,
    /// Proportional share of the fill value (cost for buys, proceeds for sells)
    pub value: Option<f64>,
    pub timestamp: i64,
    pub venue: Option<String>,
    pub coin_info_id: Option<i64>,
}

/// A closed or open position emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct TradeMatch {
    pub token_address: String,
    pub buy: Option<LegSummary>,
    pub sell: Option<LegSummary>,
    pub profit: Option<f64>,
    pub profit_pct: Option<f64>,
    pub outcome: Option<Outcome>,
    pub partial_sell: bool,
    pub status: MatchStatus,
    pub review_flag: Option<ReviewFlag>,
}

impl TradeMatch {
    /// Highest source id this record depends on
    pub fn max_source_id(&self) -> i64 {
        let buy = self.buy.as_ref().map(|l| l.source_id).unwrap_or(0);
        let sell = self.sell.as_ref().map(|l| l.source_id).unwrap_or(0);
        buy.max(sell)
    }

    /// Data-quality issue carried by a flagged record
    pub fn data_issue(&self) -> Option<PipelineError> {
        match (self.review_flag, self.sell.as_ref()) {
            (Some(ReviewFlag::OrphanSell), Some(sell)) => Some(PipelineError::Transform(format!(
                "orphan sell: {} units of {} (fill {}) never matched a buy",
                sell.amount, self.token_address, sell.source_id
            ))),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Lot {
    source_id: i64,
    original_amount: f64,
    remaining: f64,
    total_value: Option<f64>,
    timestamp: i64,
    venue: Option<String>,
    coin_info_id: Option<i64>,
}

impl Lot {
    fn key(&self) -> (i64, i64) {
        (self.timestamp, self.source_id)
    }

    fn from_fill(fill: &SourceFill) -> Self {
        Self {
            source_id: fill.source_id,
            original_amount: fill.amount,
            remaining: fill.amount,
            total_value: fill.total_value(),
            timestamp: fill.timestamp,
            venue: fill.venue.clone(),
            coin_info_id: fill.coin_info_id,
        }
    }

    fn value_of(&self, qty: f64) -> Option<f64> {
        self.total_value.map(|v| v * qty / self.original_amount)
    }

    fn leg(&self, qty: f64) -> LegSummary {
        LegSummary {
            source_id: self.source_id,
            amount: qty,
            value: self.value_of(qty),
            timestamp: self.timestamp,
            venue: self.venue.clone(),
            coin_info_id: self.coin_info_id,
        }
    }
}

#[derive(Debug, Default)]
struct TokenBook {
    buys: VecDeque<Lot>,
    sells: VecDeque<Lot>,
}

impl TokenBook {
    fn lot_count(&self) -> usize {
        self.buys.len() + self.sells.len()
    }

    fn oldest_id(&self) -> Option<i64> {
        self.buys.iter().chain(self.sells.iter()).map(|l| l.source_id).min()
    }
}

/// Insert a lot behind every lot that sorts before or equal to it
fn enqueue(queue: &mut VecDeque<Lot>, lot: Lot) {
    let key = lot.key();
    let at = queue.partition_point(|l| l.key() <= key);
    queue.insert(at, lot);
}

/// Closed trades of one batch plus the cursor position it certifies
#[derive(Debug, Default)]
pub struct BatchPairing {
    pub closed: Vec<TradeMatch>,
    /// Latest balance point reached in this batch, if any
    pub safe_point: Option<i64>,
}

/// Streaming FIFO pairing across all tokens of a run
#[derive(Debug, Default)]
pub struct PairingEngine {
    books: HashMap<String, TokenBook>,
    /// Latest (timestamp, id) of any lot already consumed by a match, per token
    matched_through: HashMap<String, (i64, i64)>,
    open_lots: usize,
    max_seen_id: i64,
    ignored: usize,
    issues: Vec<PipelineError>,
}

fn sort_fills(fills: &mut [SourceFill]) {
    fills.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.source_id.cmp(&b.source_id))
    });
}

impl PairingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills skipped because of a zero amount, missing token or unknown side
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    /// Drain the data-quality issues raised since the last call
    pub fn take_issues(&mut self) -> Vec<PipelineError> {
        std::mem::take(&mut self.issues)
    }

    /// Lowest source id still held in an unmatched lot
    pub fn oldest_open_id(&self) -> Option<i64> {
        self.books.values().filter_map(TokenBook::oldest_id).min()
    }

    /// true when no token has an unmatched lot
    pub fn is_balanced(&self) -> bool {
        self.open_lots == 0
    }

    /// Feed one fill, returning the trades it closes
    pub fn push(&mut self, fill: &SourceFill) -> Vec<TradeMatch> {
        self.max_seen_id = self.max_seen_id.max(fill.source_id);

        if fill.token_address.trim().is_empty() || !(fill.amount > QTY_EPSILON) {
            log::debug!(
                "Ignoring fill {} (token '{}', amount {})",
                fill.source_id,
                fill.token_address,
                fill.amount
            );
            self.ignored += 1;
            return Vec::new();
        }

        if fill.side == FillSide::Other {
            self.ignored += 1;
            self.issues.push(PipelineError::Transform(format!(
                "fill {} of {} has an unrecognized side, ignored",
                fill.source_id, fill.token_address
            )));
            return Vec::new();
        }

        let lot = Lot::from_fill(fill);
        if let Some(through) = self.matched_through.get(&fill.token_address) {
            if lot.key() < *through {
                self.issues.push(PipelineError::Transform(format!(
                    "fill {} of {} (ts {}) arrived after later fills were paired, paired out of time order",
                    fill.source_id, fill.token_address, fill.timestamp
                )));
            }
        }

        let book = self.books.entry(fill.token_address.clone()).or_default();
        let before = book.lot_count();

        match fill.side {
            FillSide::Buy => enqueue(&mut book.buys, lot),
            FillSide::Sell => enqueue(&mut book.sells, lot),
            FillSide::Other => {}
        }

        let matches = match_book(&fill.token_address, book);
        if let Some(latest) = matches.iter().filter_map(latest_key).max() {
            let through = self
                .matched_through
                .entry(fill.token_address.clone())
                .or_insert(latest);
            *through = (*through).max(latest);
        }

        let after = book.lot_count();
        self.open_lots = self.open_lots + after - before;
        if after == 0 {
            self.books.remove(&fill.token_address);
        }

        matches
    }

    /// Pair one id-ordered batch: fills are applied by (timestamp, id)
    pub fn pair_batch(&mut self, fills: Vec<SourceFill>) -> BatchPairing {
        let mut pending: BTreeSet<i64> = fills.iter().map(|f| f.source_id).collect();
        let mut ordered = fills;
        sort_fills(&mut ordered);

        let mut result = BatchPairing::default();
        for fill in &ordered {
            result.closed.extend(self.push(fill));
            pending.remove(&fill.source_id);

            let nothing_pending_below = pending
                .iter()
                .next()
                .map_or(true, |lowest| *lowest > self.max_seen_id);
            if self.is_balanced() && nothing_pending_below {
                result.safe_point = Some(self.max_seen_id);
            }
        }

        result
    }

    /// Remaining unmatched lots as open records, ordered by token then id
    pub fn open_positions(&self) -> Vec<TradeMatch> {
        let mut tokens: Vec<&String> = self.books.keys().collect();
        tokens.sort();

        let mut open = Vec::new();
        for token in tokens {
            let book = &self.books[token];
            for lot in &book.buys {
                open.push(TradeMatch {
                    token_address: token.clone(),
                    buy: Some(lot.leg(lot.remaining)),
                    sell: None,
                    profit: None,
                    profit_pct: None,
                    outcome: None,
                    partial_sell: true,
                    status: MatchStatus::Open,
                    review_flag: None,
                });
            }
            for lot in &book.sells {
                open.push(TradeMatch {
                    token_address: token.clone(),
                    buy: None,
                    sell: Some(lot.leg(lot.remaining)),
                    profit: None,
                    profit_pct: None,
                    outcome: None,
                    partial_sell: true,
                    status: MatchStatus::Open,
                    review_flag: Some(ReviewFlag::OrphanSell),
                });
            }
        }

        open
    }
}

fn latest_key(trade: &TradeMatch) -> Option<(i64, i64)> {
    trade
        .buy
        .iter()
        .chain(trade.sell.iter())
        .map(|l| (l.timestamp, l.source_id))
        .max()
}

fn match_book(token: &str, book: &mut TokenBook) -> Vec<TradeMatch> {
    let mut matches = Vec::new();

    while let (Some(buy), Some(sell)) = (book.buys.front_mut(), book.sells.front_mut()) {
        let qty = buy.remaining.min(sell.remaining);

        let buy_leg = buy.leg(qty);
        let sell_leg = sell.leg(qty);
        let partial_sell = (qty - buy.original_amount).abs() > QTY_EPSILON
            || (qty - sell.original_amount).abs() > QTY_EPSILON;

        let profit = match (buy_leg.value, sell_leg.value) {
            (Some(cost), Some(proceeds)) => Some(proceeds - cost),
            _ => None,
        };
        let profit_pct = match (profit, buy_leg.value) {
            (Some(p), Some(cost)) => profit_percentage(p, cost),
            _ => None,
        };

        matches.push(TradeMatch {
            token_address: token.to_string(),
            buy: Some(buy_leg),
            sell: Some(sell_leg),
            profit,
            profit_pct,
            outcome: profit.map(Outcome::classify),
            partial_sell,
            status: MatchStatus::Closed,
            review_flag: None,
        });

        buy.remaining -= qty;
        sell.remaining -= qty;
        if buy.remaining <= QTY_EPSILON {
            book.buys.pop_front();
        }
        if sell.remaining <= QTY_EPSILON {
            book.sells.pop_front();
        }
    }

    matches
}

/// Pair a complete fill history: closed trades followed by open positions
pub fn pair_fills(fills: &[SourceFill]) -> Vec<TradeMatch> {
    let mut engine = PairingEngine::new();
    let mut trades = engine.pair_batch(fills.to_vec()).closed;
    trades.extend(engine.open_positions());
    trades
}
