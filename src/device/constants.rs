use uuid::{uuid, Uuid};

/**
 * Advertised name of the tremor sensor.
 */
pub const TREMOR_PERIPHERAL_NAME: &str = "TremorBLE";

/**
 * The UUID of the Bluetooth BLE service exposed by the tremor sensor.
 */
pub const TREMOR_SERVICE: Uuid = uuid!("e7810a71-73ae-499d-8c15-faa9aef0c3f2");

/**
 * The UUID of the characteristic that notifies the 2 byte status code.
 */
pub const TREMOR_STATUS_CHARACTERISTIC: Uuid = uuid!("befc5c1c-a5d0-42db-a6c2-c0bfa020e50d");

/**
 * Number of bytes of the status code at the start of every notification.
 */
pub const STATUS_PAYLOAD_LEN: usize = 2;

pub const STATUS_TREMOR: u16 = 0x0001;
pub const STATUS_DYSKINESIA: u16 = 0x0200;
pub const STATUS_TREMOR_AND_DYSKINESIA: u16 = 0x0201;

/**
 * Capacity of the channel carrying upcalls into the client loop.
 */
pub const UPCALL_CHANNEL_SIZE: usize = 128;

/**
 * Capacity of the channel carrying events to the event sink.
 */
pub const EVENT_CHANNEL_SIZE: usize = 64;

/**
 * How long (milliseconds) a disconnect from the peripheral may take.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * How often (milliseconds) to look for a bluetooth adapter while none is available.
 */
pub const ADAPTER_RETRY_DELAY: u64 = 1000;
