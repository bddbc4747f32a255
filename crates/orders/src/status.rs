use core::str::FromStr;

use serde::{Deserialize, Serialize};

use orderflow_core::DomainError;

/// Purchase order lifecycle.
///
/// ```text
/// Opened ─► Acknowledged ─► Shipped ─► Shipment Confirmed ─► Invoiced ─► Invoice Confirmed
///   │            ├─► Backorder ───────┐        │                 │
///   │            ├─► Bypassed Acknowledge ─► Shipped             │
///   └─► Cancelled ◄┘                  └──────► Returned ◄────────┘ ─► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Opened,
    Acknowledged,
    Shipped,
    Backorder,
    #[serde(rename = "Bypassed Acknowledge")]
    BypassedAcknowledge,
    Cancelled,
    #[serde(rename = "Shipment Confirmed")]
    ShipmentConfirmed,
    Invoiced,
    #[serde(rename = "Invoice Confirmed")]
    InvoiceConfirmed,
    Returned,
    Closed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 11] = [
        OrderStatus::Opened,
        OrderStatus::Acknowledged,
        OrderStatus::Shipped,
        OrderStatus::Backorder,
        OrderStatus::BypassedAcknowledge,
        OrderStatus::Cancelled,
        OrderStatus::ShipmentConfirmed,
        OrderStatus::Invoiced,
        OrderStatus::InvoiceConfirmed,
        OrderStatus::Returned,
        OrderStatus::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Opened => "Opened",
            OrderStatus::Acknowledged => "Acknowledged",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Backorder => "Backorder",
            OrderStatus::BypassedAcknowledge => "Bypassed Acknowledge",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::ShipmentConfirmed => "Shipment Confirmed",
            OrderStatus::Invoiced => "Invoiced",
            OrderStatus::InvoiceConfirmed => "Invoice Confirmed",
            OrderStatus::Returned => "Returned",
            OrderStatus::Closed => "Closed",
        }
    }

    /// Statuses reachable in one step.
    pub fn next_statuses(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Opened => &[Acknowledged, Cancelled],
            Acknowledged => &[Shipped, Backorder, BypassedAcknowledge, Cancelled],
            Backorder => &[Shipped, Cancelled],
            BypassedAcknowledge => &[Shipped, Cancelled],
            Shipped => &[ShipmentConfirmed, Returned],
            ShipmentConfirmed => &[Invoiced, Returned],
            Invoiced => &[InvoiceConfirmed, Returned],
            Returned => &[Closed],
            Cancelled | InvoiceConfirmed | Closed => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.next_statuses().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.next_statuses().is_empty()
    }

    /// Whether goods have left the warehouse (returns are possible).
    pub fn is_shipped(self) -> bool {
        matches!(
            self,
            OrderStatus::Shipped | OrderStatus::ShipmentConfirmed | OrderStatus::Invoiced
        )
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exit() {
        for status in OrderStatus::ALL {
            let terminal = matches!(
                status,
                OrderStatus::Cancelled | OrderStatus::InvoiceConfirmed | OrderStatus::Closed
            );
            assert_eq!(status.is_terminal(), terminal, "{status}");
        }
    }

    #[test]
    fn shipped_states_may_be_returned() {
        for status in OrderStatus::ALL {
            assert_eq!(
                status.can_transition_to(OrderStatus::Returned),
                status.is_shipped(),
                "{status}"
            );
        }
    }

    #[test]
    fn invoiced_is_not_reachable_from_opened() {
        assert!(!OrderStatus::Opened.can_transition_to(OrderStatus::Invoiced));
        assert!(OrderStatus::Acknowledged.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn parses_display_names() {
        assert_eq!(
            "Bypassed Acknowledge".parse::<OrderStatus>().unwrap(),
            OrderStatus::BypassedAcknowledge
        );
        assert_eq!("invoice confirmed".parse::<OrderStatus>().unwrap(), OrderStatus::InvoiceConfirmed);
        assert!("Teleported".parse::<OrderStatus>().is_err());
    }

    mod props {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn random_walk_never_revisits_opened(steps in proptest::collection::vec(0usize..8, 0..20)) {
                let mut status = OrderStatus::Opened;
                for pick in steps {
                    let next = status.next_statuses();
                    if next.is_empty() {
                        break;
                    }
                    let target = next[pick % next.len()];
                    prop_assert!(status.can_transition_to(target));
                    prop_assert_ne!(target, OrderStatus::Opened);
                    status = target;
                }
            }
        }
    }
}
