//! Routes build escalations to the code change flow of the build's repository

use crate::build_monitor::{EscalationHandler, EscalationRequest};
use crate::error::{Error, Result};
use crate::flows::{CodeChangeFlow, FixPlan};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{info, warn};

/// Fix plans kept for inspection
const MAX_KEPT_PLANS: usize = 50;

/// Escalation handler installed into the build monitor.
///
/// Holds weak references: the flows own the monitor, which owns this router.
pub(crate) struct FixRouter {
    flows: HashMap<String, Weak<CodeChangeFlow>>,
    plans: Mutex<Vec<FixPlan>>,
}

impl FixRouter {
    pub(crate) fn new(flows: &HashMap<String, Arc<CodeChangeFlow>>) -> Self {
        Self {
            flows: flows
                .iter()
                .map(|(name, flow)| (name.clone(), Arc::downgrade(flow)))
                .collect(),
            plans: Mutex::new(Vec::new()),
        }
    }

    /// Most recent fix plans, oldest first
    pub(crate) fn plans(&self) -> Vec<FixPlan> {
        self.plans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EscalationHandler for FixRouter {
    async fn handle(&self, request: &EscalationRequest) -> Result<()> {
        let flow = self
            .flows
            .get(&request.repository)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::NotFound {
                service: "code_flows".to_string(),
                resource: request.repository.clone(),
            })?;

        match flow.fix_build(request).await {
            Ok(plan) => {
                info!(
                    repository = %request.repository,
                    build_id = request.build_id,
                    failure_class = %request.failure_class,
                    "Fix plan ready"
                );
                let mut plans = self.plans.lock().unwrap_or_else(|e| e.into_inner());
                if plans.len() == MAX_KEPT_PLANS {
                    plans.remove(0);
                }
                plans.push(plan);
                Ok(())
            }
            Err(e) => {
                warn!(repository = %request.repository, build_id = request.build_id, error = %e, "No fix plan");
                Err(e)
            }
        }
    }
}
