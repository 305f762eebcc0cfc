use std::collections::BTreeMap;

use brewery_common::{OutputError, OutputPort};
use tracing::{info, trace};

/// Host stand-in for the relay outputs: remembers each line's level and logs
/// transitions.
#[derive(Debug, Default)]
pub struct LoggingOutputPort {
    levels: BTreeMap<i32, bool>,
}

impl OutputPort for LoggingOutputPort {
    fn set_level(&mut self, pin: i32, level: bool) -> Result<(), OutputError> {
        let previous = self.levels.insert(pin, level);
        if previous == Some(level) {
            trace!(pin, level, "output rewritten");
        } else {
            info!(pin, level = u8::from(level), "output level changed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_last_level_per_pin() {
        let mut port = LoggingOutputPort::default();

        port.set_level(4, true).unwrap();
        port.set_level(4, false).unwrap();
        port.set_level(9, true).unwrap();

        assert_eq!(port.levels.get(&4), Some(&false));
        assert_eq!(port.levels.get(&9), Some(&true));
        assert_eq!(port.levels.get(&1), None);
    }
}
