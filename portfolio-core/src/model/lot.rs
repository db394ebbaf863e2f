use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A remaining slice of a BUY trade held in the FIFO queue.
#[derive(Debug, Clone)]
pub struct Lot {
	pub lot_id: Uuid,
	pub ticker: String,
	pub original_shares: Decimal,
	pub remaining_shares: Decimal,
	pub price: Decimal,
	pub original_cost_basis: Decimal,
	pub purchase_timestamp: DateTime<Utc>,
	pub currency: String,
}

impl Lot {
	pub fn new(
		ticker: impl Into<String>,
		shares: Decimal,
		price: Decimal,
		purchase_timestamp: DateTime<Utc>,
		currency: impl Into<String>,
	) -> Lot {
		Lot {
			lot_id: Uuid::new_v4(),
			ticker: ticker.into(),
			original_shares: shares,
			remaining_shares: shares,
			price,
			original_cost_basis: shares * price,
			purchase_timestamp,
			currency: currency.into(),
		}
	}

	/// `remaining_cost_basis = (remaining_shares / original_shares) * original_cost_basis` (invariant).
	pub fn remaining_cost_basis(&self) -> Decimal {
		if self.original_shares.is_zero() {
			return Decimal::ZERO;
		}
		(self.remaining_shares / self.original_shares) * self.original_cost_basis
	}

	pub fn is_fully_sold(&self) -> bool {
		self.remaining_shares <= Decimal::ZERO
	}
}

/// One FIFO consumption slice produced by a sell.
#[derive(Debug, Clone)]
pub struct SaleSlice {
	pub lot_id: Uuid,
	pub shares_sold: Decimal,
	pub cost_basis_sold: Decimal,
	pub proceeds: Decimal,
	pub realized_pnl: Decimal,
}

/// Per-ticker ordered collection of lots, FIFO by `purchase_timestamp`,
/// ties broken by insertion order.
#[derive(Debug, Clone, Default)]
pub struct LotTracker {
	pub ticker: String,
	lots: Vec<Lot>,
}

impl LotTracker {
	pub fn new(ticker: impl Into<String>) -> LotTracker {
		LotTracker {
			ticker: ticker.into(),
			lots: Vec::new(),
		}
	}

	pub fn lots(&self) -> &[Lot] {
		&self.lots
	}

	pub fn push(&mut self, lot: Lot) {
		self.lots.push(lot);
	}

	/// Lots in FIFO consumption order: ascending `purchase_timestamp`, stable
	/// on ties, so insertion order is preserved for equal
	/// timestamps via a stable sort over indices.
	pub fn fifo_order(&mut self) -> Vec<usize> {
		let mut indices: Vec<usize> = (0..self.lots.len()).collect();
		indices.sort_by_key(|&i| self.lots[i].purchase_timestamp);
		indices
	}

	pub fn lot_mut(&mut self, index: usize) -> &mut Lot {
		&mut self.lots[index]
	}

	pub fn total_remaining_shares(&self) -> Decimal {
		self.lots.iter().map(|l| l.remaining_shares).sum()
	}

	pub fn total_remaining_cost_basis(&self) -> Decimal {
		self.lots.iter().map(|l| l.remaining_cost_basis()).sum()
	}

	pub fn average_cost(&self) -> Decimal {
		let shares = self.total_remaining_shares();
		if shares.is_zero() {
			Decimal::ZERO
		} else {
			self.total_remaining_cost_basis() / shares
		}
	}
}
