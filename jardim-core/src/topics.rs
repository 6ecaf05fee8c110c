//! Broker topic conventions shared by the firmware and the hub.

use crate::PotId;

/// Inbound soil moisture, plain numeric string.
pub const HUMIDITY: &str = "plant/sensors/humidity";

/// Outbound light command, `"ON"` / `"OFF"`.
pub const LIGHT: &str = "plant/actuators/light";

/// Outbound pump command, `"ON"` / `"OFF"`.
pub const PUMP: &str = "plant/actuators/pump";

/// Per-pot status topic reserved when a pot is created.
pub fn pot_status(id: PotId) -> String {
    format!("jardim/{id}/status")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_topic_is_scoped_by_pot() {
        let id: PotId = "01JJNQ1KQCNZ8X9PQRV5ABCD12".parse().unwrap();
        assert_eq!(pot_status(id), "jardim/01JJNQ1KQCNZ8X9PQRV5ABCD12/status");
    }
}
