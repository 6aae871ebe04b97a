//! Checksum calculation algorithms
//!
//! Corus frames carry CRC-16/BUYPASS. The other algorithms stay selectable
//! for devices and gateways that deviate from it.

use serde::{Deserialize, Serialize};

/// Checksum algorithm types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumType {
    /// CRC-16/BUYPASS (polynomial 0x8005, init 0x0000, no reflection)
    #[default]
    Crc16Buypass,
    /// CRC-16 Modbus (polynomial 0x8005, init 0xFFFF, reflect)
    Crc16Modbus,
    /// Simple sum mod 65536
    Sum16,
    /// XOR of all bytes
    Xor,
}

impl ChecksumType {
    /// Get all available checksum types
    pub fn all() -> &'static [ChecksumType] {
        &[
            ChecksumType::Crc16Buypass,
            ChecksumType::Crc16Modbus,
            ChecksumType::Sum16,
            ChecksumType::Xor,
        ]
    }

    /// Get name of checksum type
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumType::Crc16Buypass => "CRC-16/BUYPASS",
            ChecksumType::Crc16Modbus => "CRC-16/Modbus",
            ChecksumType::Sum16 => "Sum-16",
            ChecksumType::Xor => "XOR",
        }
    }

    /// Get output size in bytes
    pub fn size(&self) -> usize {
        match self {
            ChecksumType::Xor => 1,
            ChecksumType::Crc16Buypass | ChecksumType::Crc16Modbus | ChecksumType::Sum16 => 2,
        }
    }
}

/// Calculate checksum for data, in wire byte order
pub fn calculate(data: &[u8], algorithm: ChecksumType) -> Vec<u8> {
    match algorithm {
        ChecksumType::Crc16Buypass => crc16_buypass(data).to_le_bytes().to_vec(),
        ChecksumType::Crc16Modbus => crc16_modbus(data).to_le_bytes().to_vec(),
        ChecksumType::Sum16 => sum16_checksum(data).to_le_bytes().to_vec(),
        ChecksumType::Xor => vec![xor_checksum(data)],
    }
}

/// Verify checksum
pub fn verify(data: &[u8], checksum: &[u8], algorithm: ChecksumType) -> bool {
    calculate(data, algorithm) == checksum
}

// ============ Individual checksum implementations ============

/// CRC-16/BUYPASS (also known as CRC-16/UMTS)
/// Polynomial: 0x8005, Init: 0x0000, RefIn: false, RefOut: false, XorOut: 0x0000
pub fn crc16_buypass(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;

    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x8005;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

/// CRC-16/Modbus
/// Polynomial: 0x8005, Init: 0xFFFF, RefIn: true, RefOut: true, XorOut: 0x0000
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// Simple 16-bit sum
pub fn sum16_checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// XOR checksum - XOR of all bytes (IEC 62056-21 block check character)
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}
