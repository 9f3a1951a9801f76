use chrono::{DateTime, Utc};

use stockledger_core::{DomainError, DomainResult, ProductId, StockItemId};

/// Sellable stock for one product.
///
/// Holds the owned `quantity`, the `reserved` portion claimed by pending
/// reservations, and the optimistic-concurrency `version`. Every mutation keeps
/// `0 <= reserved <= quantity`; none of them touch `version`, which only the
/// ledger store advances (see [`StockItem::mark_persisted`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    product_id: ProductId,
    quantity: i64,
    reserved: i64,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StockItem {
    /// Version assigned to a freshly created item.
    pub const INITIAL_VERSION: u64 = 1;

    /// Create a new ledger entry with nothing reserved.
    pub fn new(
        id: StockItemId,
        product_id: ProductId,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity < 0 {
            return Err(DomainError::invalid_quantity(quantity));
        }
        Ok(Self {
            id,
            product_id,
            quantity,
            reserved: 0,
            version: Self::INITIAL_VERSION,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rehydrate an item from storage, rejecting rows that break the invariant.
    pub fn restore(
        id: StockItemId,
        product_id: ProductId,
        quantity: i64,
        reserved: i64,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity < 0 || reserved < 0 || reserved > quantity {
            return Err(DomainError::corrupt_record("stock item violates 0 <= reserved <= quantity")
                .with_detail(format!(
                    "item={id} quantity={quantity} reserved={reserved}"
                )));
        }
        Ok(Self {
            id,
            product_id,
            quantity,
            reserved,
            version,
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> StockItemId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    /// Units eligible for new reservations.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Claim `qty` available units.
    pub fn reserve(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if qty > self.available() {
            return Err(DomainError::insufficient_stock(qty, self.available()));
        }
        self.reserved += qty;
        Ok(())
    }

    /// Return `qty` reserved units to the available pool.
    pub fn release_reservation(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if qty > self.reserved {
            return Err(DomainError::invalid_release(qty, self.reserved));
        }
        self.reserved -= qty;
        Ok(())
    }

    /// Permanently deduct `qty` reserved units.
    pub fn confirm_reservation(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if qty > self.reserved {
            return Err(DomainError::invalid_confirm(qty, self.reserved));
        }
        if qty > self.quantity {
            return Err(DomainError::insufficient_stock(qty, self.quantity));
        }
        self.reserved -= qty;
        self.quantity -= qty;
        Ok(())
    }

    /// Receive `qty` new units, bypassing reservations.
    pub fn add_stock(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        self.quantity = self
            .quantity
            .checked_add(qty)
            .ok_or_else(|| DomainError::invalid_quantity(qty).with_detail("quantity overflow"))?;
        Ok(())
    }

    /// Remove `qty` unreserved units, bypassing reservations.
    pub fn decrement_stock(&mut self, qty: i64) -> DomainResult<()> {
        ensure_positive(qty)?;
        if qty > self.available() {
            return Err(DomainError::insufficient_stock(qty, self.available()));
        }
        self.quantity -= qty;
        Ok(())
    }

    /// Record the version and timestamp the ledger store assigned on a successful write.
    ///
    /// Only store implementations should call this.
    pub fn mark_persisted(&mut self, version: u64, updated_at: DateTime<Utc>) {
        self.version = version;
        self.updated_at = updated_at;
    }
}

fn ensure_positive(qty: i64) -> DomainResult<()> {
    if qty <= 0 {
        return Err(DomainError::invalid_quantity(qty));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_core::ErrorCode;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn item_with(quantity: i64, reserved: i64) -> StockItem {
        StockItem::restore(
            StockItemId::new(),
            ProductId::new(),
            quantity,
            reserved,
            StockItem::INITIAL_VERSION,
            test_time(),
            test_time(),
        )
        .unwrap()
    }

    #[test]
    fn new_item_starts_at_version_one_with_nothing_reserved() {
        let item = StockItem::new(StockItemId::new(), ProductId::new(), 100, test_time()).unwrap();
        assert_eq!(item.version(), 1);
        assert_eq!(item.reserved(), 0);
        assert_eq!(item.available(), 100);
    }

    #[test]
    fn negative_initial_quantity_is_rejected() {
        let err = StockItem::new(StockItemId::new(), ProductId::new(), -1, test_time()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidQuantity);
    }

    #[test]
    fn restore_rejects_rows_breaking_the_invariant() {
        let err = StockItem::restore(
            StockItemId::new(),
            ProductId::new(),
            5,
            6,
            3,
            test_time(),
            test_time(),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptRecord);
    }

    #[test]
    fn reserve_up_to_available_succeeds() {
        let mut item = item_with(100, 40);
        item.reserve(60).unwrap();
        assert_eq!(item.reserved(), 100);
        assert_eq!(item.available(), 0);
    }

    #[test]
    fn reserve_beyond_available_leaves_item_unchanged() {
        let mut item = item_with(100, 40);
        let before = item.clone();
        let err = item.reserve(61).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientStock);
        assert_eq!(item, before);
    }

    #[test]
    fn non_positive_quantities_are_rejected_everywhere() {
        let mut item = item_with(10, 5);
        for qty in [0, -3] {
            assert_eq!(item.reserve(qty).unwrap_err().code(), ErrorCode::InvalidQuantity);
            assert_eq!(
                item.release_reservation(qty).unwrap_err().code(),
                ErrorCode::InvalidQuantity
            );
            assert_eq!(
                item.confirm_reservation(qty).unwrap_err().code(),
                ErrorCode::InvalidQuantity
            );
            assert_eq!(item.add_stock(qty).unwrap_err().code(), ErrorCode::InvalidQuantity);
            assert_eq!(
                item.decrement_stock(qty).unwrap_err().code(),
                ErrorCode::InvalidQuantity
            );
        }
    }

    #[test]
    fn releasing_more_than_reserved_fails() {
        let mut item = item_with(10, 5);
        assert_eq!(
            item.release_reservation(6).unwrap_err().code(),
            ErrorCode::InvalidRelease
        );
    }

    #[test]
    fn confirming_more_than_reserved_fails() {
        let mut item = item_with(10, 5);
        assert_eq!(
            item.confirm_reservation(6).unwrap_err().code(),
            ErrorCode::InvalidConfirm
        );
    }

    #[test]
    fn confirm_and_release_diverge_on_quantity() {
        let mut confirmed = item_with(100, 50);
        let mut released = confirmed.clone();

        confirmed.confirm_reservation(50).unwrap();
        released.release_reservation(50).unwrap();

        assert_eq!((confirmed.quantity(), confirmed.reserved()), (50, 0));
        assert_eq!((released.quantity(), released.reserved()), (100, 0));
    }

    #[test]
    fn decrement_cannot_eat_into_reserved_units() {
        let mut item = item_with(10, 8);
        assert_eq!(
            item.decrement_stock(3).unwrap_err().code(),
            ErrorCode::InsufficientStock
        );
        item.decrement_stock(2).unwrap();
        assert_eq!(item.quantity(), 8);
        assert_eq!(item.available(), 0);
    }

    #[test]
    fn mutations_never_touch_version() {
        let mut item = item_with(10, 0);
        item.reserve(4).unwrap();
        item.confirm_reservation(2).unwrap();
        item.release_reservation(1).unwrap();
        item.add_stock(5).unwrap();
        item.decrement_stock(1).unwrap();
        assert_eq!(item.version(), StockItem::INITIAL_VERSION);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(i64),
        Release(i64),
        Confirm(i64),
        Add(i64),
        Decrement(i64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (-5i64..60).prop_map(Op::Reserve),
            (-5i64..60).prop_map(Op::Release),
            (-5i64..60).prop_map(Op::Confirm),
            (-5i64..60).prop_map(Op::Add),
            (-5i64..60).prop_map(Op::Decrement),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of operations is attempted (valid or not),
        /// `0 <= reserved <= quantity` holds after every step, and a failed
        /// operation leaves the item untouched.
        #[test]
        fn reserved_stays_within_quantity(
            initial in 0i64..200,
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let mut item = StockItem::new(StockItemId::new(), ProductId::new(), initial, test_time()).unwrap();

            for op in ops {
                let before = item.clone();
                let result = match op {
                    Op::Reserve(q) => item.reserve(q),
                    Op::Release(q) => item.release_reservation(q),
                    Op::Confirm(q) => item.confirm_reservation(q),
                    Op::Add(q) => item.add_stock(q),
                    Op::Decrement(q) => item.decrement_stock(q),
                };
                if result.is_err() {
                    prop_assert_eq!(&item, &before);
                }
                prop_assert!(item.reserved() >= 0);
                prop_assert!(item.reserved() <= item.quantity());
                prop_assert_eq!(item.available(), item.quantity() - item.reserved());
            }
        }
    }
}
