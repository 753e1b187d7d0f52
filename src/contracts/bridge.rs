//! Bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the paired
//! source and destination contracts.

use alloy::sol;

sol! {
    /// Contract on the source chain holding deposited tokens
    contract SourceBridge {
        /// Emitted when a user locks `amount` of `token` for `recipient`
        event Deposit(address indexed token, address indexed recipient, uint256 amount);

        /// Release locked tokens back to `recipient`. Called by the relay
        /// after observing an Unwrap on the destination chain.
        function withdraw(address token, address recipient, uint256 amount) external;
    }
}

sol! {
    /// Contract on the destination chain minting wrapped tokens
    contract DestinationBridge {
        /// Emitted when a user burns wrapped tokens to redeem them on the source chain
        event Unwrap(address indexed token, address indexed recipient, uint256 amount);

        /// Mint wrapped tokens for `recipient`. Called by the relay after
        /// observing a Deposit on the source chain.
        function wrap(address token, address recipient, uint256 amount) external;
    }
}
