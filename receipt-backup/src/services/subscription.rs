//! Subscription service
//!
//! Thin layer over the store's purchase API used by the settings screen.

use crate::config::PRODUCT_PLUS;
use crate::error::Result;
use crate::events::{AppEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Analytics event recorded when the purchase flow is opened
pub const PLUS_OVERFLOW_EVENT: &str = "navigation.plus_overflow";

/// Result of validating the current subscription receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionValidation {
    pub valid: bool,
    pub ads_removed: bool,
}

/// Store purchase API
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PurchaseService: Send + Sync {
    /// Localized price of `product`
    async fn price(&self, product: &str) -> Result<String>;

    async fn purchase_plus_subscription(&self) -> Result<()>;

    /// `force` bypasses any cached receipt
    async fn validate_subscription(&self, force: bool) -> Result<SubscriptionValidation>;
}

#[cfg_attr(test, mockall::automock)]
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: &str);
}

#[derive(Clone)]
pub struct SubscriptionService {
    purchases: Arc<dyn PurchaseService>,
    analytics: Arc<dyn AnalyticsSink>,
    events: EventBus,
    valid: Arc<AtomicBool>,
}

impl SubscriptionService {
    pub fn new(
        purchases: Arc<dyn PurchaseService>,
        analytics: Arc<dyn AnalyticsSink>,
        events: EventBus,
    ) -> Self {
        Self {
            purchases,
            analytics,
            events,
            valid: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Yearly price label, e.g. `"$9.99/yr"`
    pub async fn plus_subscription_price(&self) -> Result<String> {
        let price = self.purchases.price(PRODUCT_PLUS).await?;
        Ok(format!("{}/yr", price))
    }

    /// Force a fresh validation; announces ad removal when it happens
    pub async fn restore_subscription(&self) -> Result<SubscriptionValidation> {
        let validation = self.validate(true).await?;
        if validation.ads_removed {
            self.events.emit(AppEvent::AdsRemoved);
        }
        Ok(validation)
    }

    pub async fn purchase_subscription(&self) -> Result<()> {
        self.analytics.record(PLUS_OVERFLOW_EVENT);
        self.purchases.purchase_plus_subscription().await?;
        tracing::info!("Plus subscription purchased");
        Ok(())
    }

    pub async fn subscription_validation(&self) -> Result<SubscriptionValidation> {
        self.validate(false).await
    }

    /// Outcome of the last successful validation
    pub fn has_valid_subscription(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    async fn validate(&self, force: bool) -> Result<SubscriptionValidation> {
        let validation = self.purchases.validate_subscription(force).await?;
        self.valid.store(validation.valid, Ordering::Relaxed);
        tracing::debug!("Subscription validation (force = {}): {:?}", force, validation);
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use mockall::predicate::eq;

    fn service(
        purchases: MockPurchaseService,
        analytics: MockAnalyticsSink,
    ) -> (SubscriptionService, EventBus) {
        let events = EventBus::new();
        let service =
            SubscriptionService::new(Arc::new(purchases), Arc::new(analytics), events.clone());
        (service, events)
    }

    #[tokio::test]
    async fn test_price_label() {
        let mut purchases = MockPurchaseService::new();
        purchases
            .expect_price()
            .with(eq(PRODUCT_PLUS))
            .returning(|_| Ok("$9.99".to_string()));

        let (service, _) = service(purchases, MockAnalyticsSink::new());

        assert_eq!(service.plus_subscription_price().await.unwrap(), "$9.99/yr");
    }

    #[tokio::test]
    async fn test_restore_forces_validation_and_removes_ads() {
        let mut purchases = MockPurchaseService::new();
        purchases
            .expect_validate_subscription()
            .with(eq(true))
            .times(1)
            .returning(|_| {
                Ok(SubscriptionValidation {
                    valid: true,
                    ads_removed: true,
                })
            });

        let (service, events) = service(purchases, MockAnalyticsSink::new());
        let mut rx = events.subscribe();

        let validation = service.restore_subscription().await.unwrap();

        assert!(validation.ads_removed);
        assert!(service.has_valid_subscription());
        assert_eq!(rx.try_recv().unwrap(), AppEvent::AdsRemoved);
    }

    #[tokio::test]
    async fn test_restore_without_ad_removal_is_silent() {
        let mut purchases = MockPurchaseService::new();
        purchases
            .expect_validate_subscription()
            .returning(|_| Ok(SubscriptionValidation::default()));

        let (service, events) = service(purchases, MockAnalyticsSink::new());
        let mut rx = events.subscribe();

        service.restore_subscription().await.unwrap();

        assert!(!service.has_valid_subscription());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_purchase_records_analytics_first() {
        let mut analytics = MockAnalyticsSink::new();
        analytics
            .expect_record()
            .with(eq(PLUS_OVERFLOW_EVENT))
            .times(1)
            .return_const(());
        let mut purchases = MockPurchaseService::new();
        purchases
            .expect_purchase_plus_subscription()
            .times(1)
            .returning(|| Err(AppError::Purchase("cancelled".to_string())));

        let (service, _) = service(purchases, analytics);

        assert!(matches!(
            service.purchase_subscription().await,
            Err(AppError::Purchase(_))
        ));
    }

    #[tokio::test]
    async fn test_plain_validation_is_not_forced() {
        let mut purchases = MockPurchaseService::new();
        purchases
            .expect_validate_subscription()
            .with(eq(false))
            .times(1)
            .returning(|_| {
                Ok(SubscriptionValidation {
                    valid: true,
                    ads_removed: false,
                })
            });

        let (service, _) = service(purchases, MockAnalyticsSink::new());

        assert!(service.subscription_validation().await.unwrap().valid);
        assert!(service.has_valid_subscription());
    }
}
