pub const TOPIC_SENSOR_TEMP: &str = "spzb/sensor/temperature";
pub const TOPIC_SENSOR_STATUS: &str = "spzb/sensor/status";

pub const TOPIC_CONTROLLER_STATE: &str = "spzb/controller/state";

pub const TOPIC_CMD_MODE: &str = "spzb/cmnd/mode";
pub const TOPIC_CMD_TARGET: &str = "spzb/cmnd/target";
pub const TOPIC_CMD_PRESET: &str = "spzb/cmnd/preset";
