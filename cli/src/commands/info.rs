//! Info command implementation.

use splitsync_core::protocol::constants::{
    DEFAULT_CONTROL_PORT, DEFAULT_PORT, MAX_PERIPHERALS, PROTOCOL_VERSION,
};
use splitsync_core::NodeIdentity;

/// Display node information.
pub fn show_info(node_name: String) {
    let identity = NodeIdentity::new(node_name);

    println!("\n\x1b[1mSplitsync Node Info\x1b[0m");
    println!("═══════════════════════════════════════");
    println!("\x1b[1mName:\x1b[0m            {}", identity.name);
    println!("\x1b[1mID:\x1b[0m              {}", identity.id);
    println!("\x1b[1mProtocol:\x1b[0m        v{}", PROTOCOL_VERSION);
    println!("\x1b[1mLink port:\x1b[0m       {}", DEFAULT_PORT);
    println!("\x1b[1mControl port:\x1b[0m    {}", DEFAULT_CONTROL_PORT);
    println!("\x1b[1mMax peripherals:\x1b[0m {}", MAX_PERIPHERALS);
    println!();
}
