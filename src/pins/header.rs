//! 40-pin header layout
//!
//! Physical header positions, their BCM logical numbers and the names
//! printed on most pinout cards.

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::error::{GpioError, GpioResult};

/// Header position to BCM GPIO number, for every header pin that is a GPIO
const HEADER_PINS: [(u8, u8); 28] = [
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// Header position to BCM number
pub static HEADER_TO_LOGICAL: Lazy<HashMap<u8, u8>> =
    Lazy::new(|| HEADER_PINS.iter().copied().collect());

/// BCM number to header position
pub static LOGICAL_TO_HEADER: Lazy<HashMap<u8, u8>> =
    Lazy::new(|| HEADER_PINS.iter().map(|&(header, bcm)| (bcm, header)).collect());

/// Translate a physical header position into a BCM pin number
pub fn header_to_logical(header: u8) -> GpioResult<u8> {
    HEADER_TO_LOGICAL
        .get(&header)
        .copied()
        .ok_or(GpioError::InvalidHeaderPin(header))
}

/// Header position of a BCM pin
pub fn logical_to_header(pin: u8) -> Option<u8> {
    LOGICAL_TO_HEADER.get(&pin).copied()
}

/// Display name of a BCM pin, with its common alternate function
///
/// BCM 0 and 1 are reserved for the HAT ID EEPROM and have no name.
pub fn pin_name(pin: u8) -> Option<&'static str> {
    let name = match pin {
        2 => "BCM 2 (SDA)",
        3 => "BCM 3 (SCL)",
        4 => "BCM 4 (GPCLK0)",
        5 => "BCM 5",
        6 => "BCM 6",
        7 => "BCM 7 (CE1)",
        8 => "BCM 8 (CE0)",
        9 => "BCM 9 (MISO)",
        10 => "BCM 10 (MOSI)",
        11 => "BCM 11 (SCLK)",
        12 => "BCM 12 (PWM0)",
        13 => "BCM 13 (PWM1)",
        14 => "BCM 14 (TXD)",
        15 => "BCM 15 (RXD)",
        16 => "BCM 16",
        17 => "BCM 17",
        18 => "BCM 18 (PWM0)",
        19 => "BCM 19 (MISO)",
        20 => "BCM 20 (MOSI)",
        21 => "BCM 21 (SCLK)",
        22 => "BCM 22",
        23 => "BCM 23",
        24 => "BCM 24",
        25 => "BCM 25",
        26 => "BCM 26",
        27 => "BCM 27",
        _ => return None,
    };
    Some(name)
}

/// ASCII diagram of the header
pub fn header_diagram() -> &'static str {
    HEADER_DIAGRAM
}

const HEADER_DIAGRAM: &str = "\
+--------------------------------------+
| 1  3v3 Power      | 2  5v Power      |
| 3  BCM 2 (SDA)    | 4  5v Power      |
| 5  BCM 3 (SCL)    | 6  Ground        |
| 7  BCM 4 (GPCLK0) | 8  BCM 14 (TXD)  |
| 9  Ground         | 10 BCM 15 (RXD)  |
| 11 BCM 17         | 12 BCM 18 (PWM0) |
| 13 BCM 27         | 14 Ground        |
| 15 BCM 22         | 16 BCM 23        |
| 17 3v3 Power      | 18 BCM 24        |
| 19 BCM 10 (MOSI)  | 20 Ground        |
| 21 BCM 9 (MISO)   | 22 BCM 25        |
| 23 BCM 11 (SCLK)  | 24 BCM 8 (CE0)   |
| 25 Ground         | 26 BCM 7 (CE1)   |
| 27 (ID_SD)        | 28 (ID_SC)       |
| 29 BCM 5          | 30 Ground        |
| 31 BCM 6          | 32 BCM 12 (PWM0) |
| 33 BCM 13 (PWM1)  | 34 Ground        |
| 35 BCM 19 (MISO)  | 36 BCM 16        |
| 37 BCM 26         | 38 BCM 20 (MOSI) |
| 39 Ground         | 40 BCM 21 (SCLK) |
+--------------------------------------+";
