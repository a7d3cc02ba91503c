// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Input events a connection delivers to the host application.

/// An input event from the client, delivered on a connection's event
/// stream. The stream closes exactly once, when the connection terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press or release.
    Key {
        /// True if the key is pressed, false if released.
        down: bool,
        /// The X Window System keysym of the key.
        key: u32,
    },

    /// A pointer (mouse) movement or button event.
    Pointer {
        /// Bitmask of pressed buttons (bit 0 = left, bit 1 = middle,
        /// bit 2 = right, bits 3-4 = scroll wheel).
        button_mask: u8,
        /// X coordinate of the pointer.
        x: u16,
        /// Y coordinate of the pointer.
        y: u16,
    },
}
