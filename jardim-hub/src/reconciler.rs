//! Pure state transitions for a pot's live state.

use jardim_core::{Moisture, Notification, NotificationId, PlantMood, Pot, topics};
use ulid::Ulid;

/// Moisture below this makes a plant thirsty.
pub const THIRSTY_BELOW: f64 = 30.0;

/// Why a telemetry message was not applied. The pot is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejected {
    #[error("payload {0:?} is not a number")]
    NotNumeric(String),
    #[error("moisture {0} is outside 0..=100")]
    OutOfRange(f64),
    #[error("topic {0} does not carry telemetry")]
    UnrelatedTopic(String),
}

pub fn compute_mood(pot: &Pot) -> PlantMood {
    if pot.moisture_percent.value() < THIRSTY_BELOW {
        PlantMood::Thirsty
    } else if pot.light_on {
        PlantMood::Happy
    } else {
        PlantMood::Scared
    }
}

/// Apply an inbound telemetry message to `pot`, returning the updated copy.
pub fn on_telemetry(topic: &str, raw: &str, pot: &Pot) -> Result<Pot, Rejected> {
    if topic != topics::HUMIDITY {
        return Err(Rejected::UnrelatedTopic(topic.to_owned()));
    }

    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Rejected::NotNumeric(raw.to_owned()))?;

    // `parse` accepts "NaN" and "inf".
    if !value.is_finite() {
        return Err(Rejected::NotNumeric(raw.to_owned()));
    }

    let moisture = Moisture::new(value).map_err(|e| Rejected::OutOfRange(e.0))?;

    let mut updated = pot.clone();
    updated.moisture_percent = moisture;
    Ok(updated)
}

/// The notification to raise when a pot's mood moves from `previous` to `current`.
///
/// Only entering a problem mood is worth telling anyone about.
pub fn on_mood_changed(
    previous: PlantMood,
    current: PlantMood,
    pot_name: &str,
) -> Option<Notification> {
    if previous == current {
        return None;
    }

    let (title, body) = match current {
        PlantMood::Happy => return None,
        PlantMood::Thirsty => (
            format!("{pot_name} is thirsty!"),
            "Soil moisture is low. How about watering it now?",
        ),
        PlantMood::Scared => (
            format!("{pot_name} needs attention!"),
            "Light or temperature conditions are not ideal.",
        ),
    };

    Some(Notification {
        id: NotificationId(Ulid::new()),
        title,
        body: body.to_owned(),
        mood: current,
        created_at: jiff::Timestamp::now(),
        read: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jardim_core::PotDraft;

    fn pot(moisture: f64, light_on: bool) -> Pot {
        let mut pot = Pot::from_draft(PotDraft {
            name: "Jiboia".into(),
            ..Default::default()
        });
        pot.moisture_percent = Moisture::new(moisture).unwrap();
        pot.light_on = light_on;
        pot
    }

    #[test]
    fn mood_rules() {
        assert_eq!(compute_mood(&pot(29.9, true)), PlantMood::Thirsty);
        assert_eq!(compute_mood(&pot(10.0, false)), PlantMood::Thirsty);
        assert_eq!(compute_mood(&pot(30.0, true)), PlantMood::Happy);
        assert_eq!(compute_mood(&pot(80.0, false)), PlantMood::Scared);
    }

    #[test]
    fn humidity_updates_moisture_only() {
        let before = pot(50.0, true);
        let after = on_telemetry(topics::HUMIDITY, " 27.5\n", &before).unwrap();

        assert_eq!(after.moisture_percent.value(), 27.5);
        assert_eq!(after.light_on, before.light_on);
        assert_eq!(after.id, before.id);
    }

    #[test]
    fn bad_payloads_are_rejected() {
        let before = pot(50.0, true);

        assert_eq!(
            on_telemetry(topics::HUMIDITY, "wet", &before),
            Err(Rejected::NotNumeric("wet".into()))
        );
        assert_eq!(
            on_telemetry(topics::HUMIDITY, "NaN", &before),
            Err(Rejected::NotNumeric("NaN".into()))
        );
        assert_eq!(
            on_telemetry(topics::HUMIDITY, "150", &before),
            Err(Rejected::OutOfRange(150.0))
        );
        assert_eq!(
            on_telemetry(topics::HUMIDITY, "-1", &before),
            Err(Rejected::OutOfRange(-1.0))
        );
        assert!(matches!(
            on_telemetry(topics::LIGHT, "40", &before),
            Err(Rejected::UnrelatedTopic(_))
        ));
    }

    #[test]
    fn bounds_are_inclusive() {
        let before = pot(50.0, true);
        assert!(on_telemetry(topics::HUMIDITY, "0", &before).is_ok());
        assert!(on_telemetry(topics::HUMIDITY, "100", &before).is_ok());
    }

    #[test]
    fn only_problem_transitions_notify() {
        let thirsty = on_mood_changed(PlantMood::Happy, PlantMood::Thirsty, "Jiboia").unwrap();
        assert_eq!(thirsty.title, "Jiboia is thirsty!");
        assert_eq!(thirsty.mood, PlantMood::Thirsty);
        assert!(!thirsty.read);

        let scared = on_mood_changed(PlantMood::Thirsty, PlantMood::Scared, "Jiboia").unwrap();
        assert_eq!(scared.title, "Jiboia needs attention!");

        assert!(on_mood_changed(PlantMood::Thirsty, PlantMood::Happy, "Jiboia").is_none());
        assert!(on_mood_changed(PlantMood::Thirsty, PlantMood::Thirsty, "Jiboia").is_none());
    }
}
