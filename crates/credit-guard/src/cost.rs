use std::collections::HashMap;

/// Maps `provider_name -> base_credits`, the unmodified cost of one
/// generation against that provider.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    base_credits: HashMap<String, u64>,
    mixup_surcharge: u64,
    mashup_surcharge: u64,
}

impl CostMatrix {
    /// An empty matrix; every provider looks up to `None` until added.
    pub fn new(mixup_surcharge: u64, mashup_surcharge: u64) -> Self {
        Self {
            base_credits: HashMap::new(),
            mixup_surcharge,
            mashup_surcharge,
        }
    }

    /// Registers (or overwrites) a provider's base cost.
    pub fn set_base_credits(&mut self, provider: impl Into<String>, base_credits: u64) {
        self.base_credits.insert(provider.into(), base_credits);
    }

    /// The provider's unmodified base cost, if registered.
    pub fn base_credits(&self, provider: &str) -> Option<u64> {
        self.base_credits.get(provider).copied()
    }

    /// Computes the effective credit cost for a generation request.
    ///
    /// `multiplier` scales the base cost (e.g. batch size); `mixup` and
    /// `mashup` each add a flat surcharge when the corresponding
    /// compositing feature is requested. Returns `None` if the provider
    /// is not registered. Pure: same inputs always produce the same
    /// cost, so it is safe to call before any balance lookup.
    pub fn credit_cost(
        &self,
        provider: &str,
        multiplier: Option<f64>,
        mixup: bool,
        mashup: bool,
    ) -> Option<u64> {
        let base = self.base_credits(provider)?;
        let scaled = (base as f64) * multiplier.unwrap_or(1.0).max(0.0);
        let mut cost = scaled.ceil() as u64;
        if mixup {
            cost += self.mixup_surcharge;
        }
        if mashup {
            cost += self.mashup_surcharge;
        }
        Some(cost)
    }
}

impl Default for CostMatrix {
    /// `mixup` and `mashup` each add 5 credits over the provider's base
    /// cost; no providers are registered (callers building a real
    /// deployment register their own price list).
    fn default() -> Self {
        Self::new(5, 5)
    }
}
