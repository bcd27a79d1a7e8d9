//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements          | Connects to                  |
//! |-----------------|---------------------|------------------------------|
//! | `log_sink`      | EventSink           | `log` facade                 |
//! | `volume_log`    | EventSink           | `<dir>/<well>_volume.log`    |
//! | `store`         | ConfigPort          | `<root>/<namespace>/<key>`   |
//! |                 | StoragePort         | (calibration curves per rig) |
//! | `sim_actuator`  | ActuatorPort        | simulated pumps and valves   |
//! | `image_source`  | ImageSourcePort     | image files on disk          |
//! | `time`          | ClockPort           | system clock                 |

pub mod image_source;
pub mod log_sink;
pub mod sim_actuator;
pub mod store;
pub mod time;
pub mod volume_log;
