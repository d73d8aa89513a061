//! 检查申请台账
//!
//! RIS端唯一持有和修改 `Order` 的组件。所有读写都在同一把锁内完成。
//! 扫描任务先认领(claim)待发送的申请，再根据确认结果完成或释放，
//! 保证同一申请不会被并发的两轮扫描重复发送，也只会转换一次状态。

use std::collections::HashSet;

use radlink_core::{Order, OrderStatus, PatientDemographics};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct LedgerState {
    orders: Vec<Order>, // 按接收顺序
    in_flight: HashSet<String>,
    set_aside: HashSet<String>, // 无法生成结果的申请，不再被认领
}

impl LedgerState {
    fn find_mut(&mut self, order_id: &str) -> Option<&mut Order> {
        self.orders.iter_mut().find(|order| order.order_id == order_id)
    }
}

/// 检查申请台账
#[derive(Debug, Default)]
pub struct OrderLedger {
    state: Mutex<LedgerState>,
}

impl OrderLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新的待处理申请
    ///
    /// 申请号已存在时保留原记录（包括其状态），返回 `false`。
    pub async fn insert_pending(
        &self,
        order_id: &str,
        study_descriptor: &str,
        patient: Option<PatientDemographics>,
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.find_mut(order_id).is_some() {
            debug!("Order {} already in ledger, keeping existing entry", order_id);
            return false;
        }

        state
            .orders
            .push(Order::pending(order_id, study_descriptor).with_patient(patient));
        info!("Order {} registered as pending ({})", order_id, study_descriptor);
        true
    }

    /// 认领所有未被认领的待处理申请
    pub async fn claim_pending(&self) -> Vec<Order> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let claimed: Vec<Order> = state
            .orders
            .iter()
            .filter(|order| {
                order.status == OrderStatus::Pending
                    && !state.in_flight.contains(&order.order_id)
                    && !state.set_aside.contains(&order.order_id)
            })
            .cloned()
            .collect();

        for order in &claimed {
            state.in_flight.insert(order.order_id.clone());
        }
        claimed
    }

    /// 结果已被AA确认：`Pending → ResultSent`
    ///
    /// 只有当前仍为 `Pending` 时才会转换，返回是否发生了转换。
    pub async fn complete(&self, order_id: &str) -> bool {
        let mut state = self.state.lock().await;
        state.in_flight.remove(order_id);

        match state.find_mut(order_id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::ResultSent;
                info!("Order {} transitioned to ResultSent", order_id);
                true
            }
            _ => false,
        }
    }

    /// 放弃认领，申请保持 `Pending`，下一轮扫描重试
    pub async fn release(&self, order_id: &str) {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(order_id) {
            debug!("Order {} released, stays pending", order_id);
        }
    }

    /// 结果无法生成：申请保持 `Pending`，但之后的扫描不再认领
    pub async fn set_aside(&self, order_id: &str) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(order_id);
        if state.set_aside.insert(order_id.to_string()) {
            warn!("Order {} set aside, no further results will be attempted", order_id);
        }
    }

    pub async fn is_set_aside(&self, order_id: &str) -> bool {
        self.state.lock().await.set_aside.contains(order_id)
    }

    pub async fn get(&self, order_id: &str) -> Option<Order> {
        let state = self.state.lock().await;
        state
            .orders
            .iter()
            .find(|order| order.order_id == order_id)
            .cloned()
    }

    /// 全部申请的快照
    pub async fn snapshot(&self) -> Vec<Order> {
        self.state.lock().await.orders.clone()
    }

    pub async fn pending_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .orders
            .iter()
            .filter(|order| order.status == OrderStatus::Pending)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
