//! Market price feed with a local sample fallback.
//!
//! The dashboard polls a [`PriceFeed`] on a fixed interval. When the primary
//! feed errors or does not answer within the timeout, [`FallbackFeed`] serves
//! locally perturbed sample data instead, so a poll never fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use qp_types::errors::FeedError;

/// A raw quote as delivered by a price provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub change: Decimal,
    pub percent_change: Decimal,
    pub volume: u64,
}

/// A quote formatted for the instrument table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub ticker: String,
    pub name: String,
    pub price: Decimal,
    /// Signed, two decimals, e.g. `"+22.10"`.
    pub change: String,
    /// Signed, two decimals, e.g. `"-0.17%"`.
    pub change_percent: String,
    pub volume: String,
    pub market: String,
}

/// Source of market quotes.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest quotes for `symbols`; an empty slice asks for everything the
    /// feed knows.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, FeedError>;
}

struct InstrumentSpec {
    ticker: &'static str,
    name: &'static str,
    market: &'static str,
    price_cents: i64,
    change_cents: i64,
    volume: u64,
    /// Whether the sample feed moves this price between polls.
    moves: bool,
}

const SAMPLE_INSTRUMENTS: [InstrumentSpec; 11] = [
    InstrumentSpec { ticker: "^GSPC", name: "S&P 500 Index", market: "INDEX", price_cents: 543_080, change_cents: 2_210, volume: 2_800_000_000, moves: true },
    InstrumentSpec { ticker: "^IXIC", name: "NASDAQ Composite", market: "INDEX", price_cents: 1_765_020, change_cents: 13_550, volume: 5_300_000_000, moves: true },
    InstrumentSpec { ticker: "AAPL", name: "Apple Inc.", market: "NASDAQ", price_cents: 21_504, change_cents: 198, volume: 70_000_000, moves: false },
    InstrumentSpec { ticker: "MSFT", name: "Microsoft Corp.", market: "NASDAQ", price_cents: 44_050, change_cents: -75, volume: 22_000_000, moves: false },
    InstrumentSpec { ticker: "GOOGL", name: "Alphabet Inc. C", market: "NASDAQ", price_cents: 17_820, change_cents: 112, volume: 26_000_000, moves: false },
    InstrumentSpec { ticker: "AMZN", name: "Amazon.com Inc.", market: "NASDAQ", price_cents: 18_560, change_cents: -105, volume: 48_000_000, moves: false },
    InstrumentSpec { ticker: "NVDA", name: "NVIDIA Corporation", market: "NASDAQ", price_cents: 13_070, change_cents: 425, volume: 150_000_000, moves: false },
    InstrumentSpec { ticker: "TSLA", name: "Tesla, Inc.", market: "NASDAQ", price_cents: 18_230, change_cents: 280, volume: 90_000_000, moves: false },
    InstrumentSpec { ticker: "SPY", name: "SPDR S&P 500 ETF", market: "ARCA", price_cents: 54_250, change_cents: 210, volume: 75_000_000, moves: false },
    InstrumentSpec { ticker: "BTC/USD", name: "Bitcoin", market: "Crypto", price_cents: 6_589_000, change_cents: -120_000, volume: 38_000, moves: false },
    InstrumentSpec { ticker: "ETH/USD", name: "Ethereum", market: "Crypto", price_cents: 354_000, change_cents: 2_550, volume: 1_100_000, moves: false },
];

fn instrument_spec(ticker: &str) -> Option<&'static InstrumentSpec> {
    SAMPLE_INSTRUMENTS.iter().find(|spec| spec.ticker == ticker)
}

/// Every ticker the sample feed serves, in table order.
pub fn sample_tickers() -> Vec<String> {
    SAMPLE_INSTRUMENTS
        .iter()
        .map(|spec| spec.ticker.to_string())
        .collect()
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

struct SampleQuote {
    spec: &'static InstrumentSpec,
    price: Decimal,
    previous_close: Decimal,
}

impl SampleQuote {
    fn quote(&self) -> Quote {
        let change = round2(self.price - self.previous_close);
        let percent_change = change
            .checked_div(self.previous_close)
            .map(|ratio| round2(ratio * Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO);
        Quote {
            symbol: self.spec.ticker.to_string(),
            price: self.price,
            change,
            percent_change,
            volume: self.spec.volume,
        }
    }
}

struct SampleState {
    quotes: Vec<SampleQuote>,
    rng: Box<dyn RngCore + Send>,
}

/// In-process feed over the built-in instrument table.
///
/// Each poll nudges the index prices by up to ±0.05% while the previous close
/// stays fixed, so change and change % drift with the price.
pub struct SampleFeed {
    state: Mutex<SampleState>,
}

impl SampleFeed {
    pub fn new<R: RngCore + Send + 'static>(rng: R) -> Self {
        let quotes = SAMPLE_INSTRUMENTS
            .iter()
            .map(|spec| {
                let price = Decimal::new(spec.price_cents, 2);
                SampleQuote {
                    spec,
                    price,
                    previous_close: price - Decimal::new(spec.change_cents, 2),
                }
            })
            .collect();
        Self {
            state: Mutex::new(SampleState {
                quotes,
                rng: Box::new(rng),
            }),
        }
    }

    pub fn with_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Advance the sample prices one poll and return the quotes for `symbols`.
    pub fn quotes(&self, symbols: &[String]) -> Vec<Quote> {
        let mut state = self.state.lock();
        let SampleState { quotes, rng } = &mut *state;
        for sample in quotes.iter_mut().filter(|q| q.spec.moves) {
            let u = Decimal::from_f64(rng.gen::<f64>()).unwrap_or(Decimal::new(5, 1));
            let delta = (u - Decimal::new(5, 1)) * sample.price * Decimal::new(1, 3);
            sample.price = round2(sample.price + delta);
        }
        quotes
            .iter()
            .filter(|q| symbols.is_empty() || symbols.iter().any(|s| s == q.spec.ticker))
            .map(SampleQuote::quote)
            .collect()
    }
}

#[async_trait]
impl PriceFeed for SampleFeed {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, FeedError> {
        Ok(self.quotes(symbols))
    }
}

/// A feed with no provider behind it; every fetch fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFeed;

#[async_trait]
impl PriceFeed for OfflineFeed {
    async fn fetch_quotes(&self, _symbols: &[String]) -> Result<Vec<Quote>, FeedError> {
        Err(FeedError::Transport {
            message: "no market data provider configured".into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSource {
    Live,
    Sample,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPoll {
    pub instruments: Vec<Instrument>,
    pub source: FeedSource,
    /// Why the primary feed was bypassed, when it was.
    pub fallback_reason: Option<String>,
    pub polled_at: DateTime<Utc>,
}

/// Primary feed guarded by a timeout, backed by [`SampleFeed`].
pub struct FallbackFeed<P> {
    primary: P,
    sample: SampleFeed,
    symbols: Vec<String>,
    timeout: Duration,
}

impl<P: PriceFeed> FallbackFeed<P> {
    pub fn new(primary: P, sample: SampleFeed, timeout: Duration) -> Self {
        Self {
            primary,
            sample,
            symbols: sample_tickers(),
            timeout,
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Fetch from the primary feed, falling back to sample data on any error
    /// or timeout.
    pub async fn poll(&self) -> FeedPoll {
        let fetch = self.primary.fetch_quotes(&self.symbols);
        let error = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(Ok(quotes)) => {
                debug!(quotes = quotes.len(), "live quotes received");
                return FeedPoll {
                    instruments: transform_quotes(&quotes),
                    source: FeedSource::Live,
                    fallback_reason: None,
                    polled_at: Utc::now(),
                };
            }
            Ok(Err(e)) => e,
            Err(_) => FeedError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        warn!(error = %error, "price feed unavailable, serving sample data");
        let quotes = self.sample.quotes(&self.symbols);
        FeedPoll {
            instruments: transform_quotes(&quotes),
            source: FeedSource::Sample,
            fallback_reason: Some(error.to_string()),
            polled_at: Utc::now(),
        }
    }
}

impl<P: PriceFeed + 'static> FallbackFeed<P> {
    /// Poll every `every` on the current tokio runtime and send each result to
    /// `tx`. The task ends when the receiver is dropped or the handle aborted.
    pub fn spawn_polling(self: Arc<Self>, every: Duration, tx: Sender<FeedPoll>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let poll = self.poll().await;
                match tx.try_send(poll) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => debug!("feed consumer lagging, poll dropped"),
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            debug!("feed polling stopped");
        })
    }
}

/// Map raw quotes to display rows. Tickers missing from the instrument table
/// keep the ticker as name and get market `UNKNOWN`.
pub fn transform_quotes(quotes: &[Quote]) -> Vec<Instrument> {
    quotes
        .iter()
        .map(|quote| {
            let (name, market) = instrument_spec(&quote.symbol)
                .map(|spec| (spec.name.to_string(), spec.market.to_string()))
                .unwrap_or_else(|| (quote.symbol.clone(), "UNKNOWN".to_string()));
            Instrument {
                id: quote
                    .symbol
                    .to_lowercase()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect(),
                ticker: quote.symbol.clone(),
                name,
                price: quote.price,
                change: signed(quote.change),
                change_percent: format!("{}%", signed(quote.percent_change)),
                volume: format_volume(quote.volume),
                market,
            }
        })
        .collect()
}

fn signed(value: Decimal) -> String {
    let rounded = round2(value);
    if value >= Decimal::ZERO {
        format!("+{rounded:.2}")
    } else {
        format!("{rounded:.2}")
    }
}

/// `2800000000` → `"2.8B"`, `70000000` → `"70.0M"`, `38000` → `"38.0K"`.
pub fn format_volume(volume: u64) -> String {
    let v = volume as f64;
    if v >= 1e9 {
        format!("{:.1}B", v / 1e9)
    } else if v >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if v >= 1e3 {
        format!("{:.1}K", v / 1e3)
    } else {
        volume.to_string()
    }
}
