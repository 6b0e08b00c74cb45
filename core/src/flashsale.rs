//! Flash sale aggregate checks.
//!
//! Pure, dependency-free logic over a definition held in memory. These checks
//! read the durable "truth" counters (`sold_count`), not the ledger, so they
//! are advisory: only the ledger's atomic admission prevents oversell under
//! concurrency. They back the window validation in admission and stock audits.

use crate::error::{FlashsaleError, OrderError};
use crate::types::{FlashsaleDefinition, FlashsaleStatus, NewFlashsale};
use chrono::{DateTime, Utc};

impl FlashsaleDefinition {
    /// `status == Ongoing && start <= now < end`.
    #[must_use]
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.status == FlashsaleStatus::Ongoing && self.window_contains(now)
    }

    /// Half-open interval test on the sale window, ignoring status.
    #[must_use]
    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now < self.end_time
    }

    /// `sold_count + quantity <= total_stock`, without overflow.
    #[must_use]
    pub fn has_capacity(&self, sold_count: i32, quantity: i32) -> bool {
        i64::from(sold_count) + i64::from(quantity) <= i64::from(self.total_stock)
    }

    /// Status as seen at `now`.
    ///
    /// Terminal statuses are returned as stored. Otherwise the status is derived
    /// from the window, so a sale whose `Pending -> Ongoing` transition has not
    /// been driven yet still reads as `Ongoing` inside its window.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> FlashsaleStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if now < self.start_time {
            FlashsaleStatus::Pending
        } else if now < self.end_time {
            FlashsaleStatus::Ongoing
        } else {
            FlashsaleStatus::Ended
        }
    }

    /// Admission gate evaluated before the ledger is touched.
    ///
    /// # Errors
    ///
    /// - [`OrderError::SaleClosed`] if the sale was canceled
    /// - [`OrderError::NotStarted`] if `now < start_time`
    /// - [`OrderError::Ended`] if the sale ended or `now >= end_time`
    pub fn check_admission_window(&self, now: DateTime<Utc>) -> Result<(), OrderError> {
        match self.status {
            FlashsaleStatus::Canceled => return Err(OrderError::SaleClosed(self.id)),
            FlashsaleStatus::Ended => return Err(OrderError::Ended(self.id)),
            FlashsaleStatus::Pending | FlashsaleStatus::Ongoing => {},
        }
        if now < self.start_time {
            return Err(OrderError::NotStarted(self.id));
        }
        if now >= self.end_time {
            return Err(OrderError::Ended(self.id));
        }
        Ok(())
    }

    /// `Pending -> Ongoing`, allowed once the window has opened.
    ///
    /// # Errors
    ///
    /// Returns [`FlashsaleError::IllegalTransition`] from any other status or
    /// before `start_time`.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), FlashsaleError> {
        if self.status != FlashsaleStatus::Pending || now < self.start_time {
            return Err(self.illegal(FlashsaleStatus::Ongoing));
        }
        self.status = FlashsaleStatus::Ongoing;
        Ok(())
    }

    /// `Pending | Ongoing -> Ended`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashsaleError::IllegalTransition`] from a terminal status.
    pub fn end(&mut self) -> Result<(), FlashsaleError> {
        self.move_to_terminal(FlashsaleStatus::Ended)
    }

    /// `Pending | Ongoing -> Canceled`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashsaleError::IllegalTransition`] from a terminal status.
    pub fn cancel(&mut self) -> Result<(), FlashsaleError> {
        self.move_to_terminal(FlashsaleStatus::Canceled)
    }

    fn move_to_terminal(&mut self, to: FlashsaleStatus) -> Result<(), FlashsaleError> {
        if self.status.is_terminal() {
            return Err(self.illegal(to));
        }
        self.status = to;
        Ok(())
    }

    fn illegal(&self, to: FlashsaleStatus) -> FlashsaleError {
        FlashsaleError::IllegalTransition {
            from: self.status,
            to,
        }
    }
}

impl NewFlashsale {
    /// Field constraints for a new sale.
    ///
    /// # Errors
    ///
    /// Returns [`FlashsaleError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), FlashsaleError> {
        if self.name.trim().is_empty() {
            return Err(FlashsaleError::Invalid("name must not be empty".into()));
        }
        if self.start_time >= self.end_time {
            return Err(FlashsaleError::Invalid(
                "start_time must be before end_time".into(),
            ));
        }
        if self.total_stock <= 0 {
            return Err(FlashsaleError::Invalid("total_stock must be positive".into()));
        }
        if self.limit_per_user < 0 {
            return Err(FlashsaleError::Invalid(
                "limit_per_user must not be negative".into(),
            ));
        }
        if self.flash_price <= 0 || self.flash_price > self.original_price {
            return Err(FlashsaleError::Invalid(
                "flash_price must be positive and not above original_price".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{FlashsaleId, ProductId, SkuId};
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 11, 0, 0, 0).unwrap()
    }

    fn sale(status: FlashsaleStatus) -> FlashsaleDefinition {
        FlashsaleDefinition {
            id: FlashsaleId::new(1),
            name: "Singles Day".into(),
            product_id: ProductId::new(10),
            sku_id: SkuId::new(100),
            original_price: 19_900,
            flash_price: 9_900,
            total_stock: 10,
            limit_per_user: 2,
            sold_count: 0,
            start_time: t0(),
            end_time: t0() + Duration::hours(1),
            status,
            created_at: t0() - Duration::days(1),
        }
    }

    fn new_sale() -> NewFlashsale {
        NewFlashsale {
            name: "Singles Day".into(),
            product_id: ProductId::new(10),
            sku_id: SkuId::new(100),
            original_price: 19_900,
            flash_price: 9_900,
            total_stock: 10,
            limit_per_user: 2,
            start_time: t0(),
            end_time: t0() + Duration::hours(1),
        }
    }

    #[test]
    fn window_is_half_open() {
        let s = sale(FlashsaleStatus::Ongoing);
        assert!(!s.is_within_window(t0() - Duration::seconds(1)));
        assert!(s.is_within_window(t0()));
        assert!(s.is_within_window(s.end_time - Duration::milliseconds(1)));
        assert!(!s.is_within_window(s.end_time));
    }

    #[test]
    fn within_window_requires_ongoing_status() {
        assert!(!sale(FlashsaleStatus::Pending).is_within_window(t0()));
        assert!(!sale(FlashsaleStatus::Canceled).is_within_window(t0()));
    }

    #[test]
    fn admission_window_rejections() {
        let s = sale(FlashsaleStatus::Pending);
        assert_eq!(
            s.check_admission_window(t0() - Duration::seconds(1)),
            Err(OrderError::NotStarted(s.id))
        );
        assert_eq!(s.check_admission_window(t0()), Ok(()));
        assert_eq!(s.check_admission_window(s.end_time), Err(OrderError::Ended(s.id)));

        let canceled = sale(FlashsaleStatus::Canceled);
        assert_eq!(
            canceled.check_admission_window(t0()),
            Err(OrderError::SaleClosed(canceled.id))
        );
        let ended = sale(FlashsaleStatus::Ended);
        assert_eq!(ended.check_admission_window(t0()), Err(OrderError::Ended(ended.id)));
    }

    #[test]
    fn capacity_boundary() {
        let s = sale(FlashsaleStatus::Ongoing);
        assert!(s.has_capacity(9, 1));
        assert!(!s.has_capacity(10, 1));
        assert!(!s.has_capacity(i32::MAX, i32::MAX));
    }

    #[test]
    fn effective_status_follows_clock_for_open_sales() {
        let s = sale(FlashsaleStatus::Pending);
        assert_eq!(s.effective_status(t0() - Duration::minutes(1)), FlashsaleStatus::Pending);
        assert_eq!(s.effective_status(t0()), FlashsaleStatus::Ongoing);
        assert_eq!(s.effective_status(s.end_time), FlashsaleStatus::Ended);
        assert_eq!(
            sale(FlashsaleStatus::Canceled).effective_status(t0()),
            FlashsaleStatus::Canceled
        );
    }

    #[test]
    fn lifecycle_transitions() {
        let mut s = sale(FlashsaleStatus::Pending);
        assert!(s.activate(t0() - Duration::seconds(1)).is_err());
        s.activate(t0()).unwrap();
        assert_eq!(s.status, FlashsaleStatus::Ongoing);
        s.end().unwrap();
        assert_eq!(
            s.cancel(),
            Err(FlashsaleError::IllegalTransition {
                from: FlashsaleStatus::Ended,
                to: FlashsaleStatus::Canceled,
            })
        );
    }

    #[test]
    fn validation_rejects_bad_definitions() {
        assert!(new_sale().validate().is_ok());

        let mut inverted = new_sale();
        inverted.end_time = inverted.start_time;
        assert!(inverted.validate().is_err());

        let mut no_stock = new_sale();
        no_stock.total_stock = 0;
        assert!(no_stock.validate().is_err());

        let mut markup = new_sale();
        markup.flash_price = markup.original_price + 1;
        assert!(markup.validate().is_err());

        let mut unlimited = new_sale();
        unlimited.limit_per_user = 0;
        assert!(unlimited.validate().is_ok());
    }

    proptest! {
        #[test]
        fn capacity_matches_wide_arithmetic(sold in 0i32..1_000, qty in 1i32..1_000, stock in 1i32..1_000) {
            let mut s = sale(FlashsaleStatus::Ongoing);
            s.total_stock = stock;
            prop_assert_eq!(s.has_capacity(sold, qty), sold + qty <= stock);
        }
    }
}
