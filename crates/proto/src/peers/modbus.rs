//! Modbus/TCP client: Read Holding Registers (function 0x03).
//!
//! The binary length-prefixed exemplar. Every request carries an MBAP
//! header:
//!
//! ```text
//! uint16 BE  transaction id   (echoed by the server)
//! uint16 BE  protocol id      (always 0)
//! uint16 BE  length           (bytes that follow, unit id included)
//! uint8      unit id
//! ```
//!
//! followed by the PDU. Exception responses set the high bit of the function
//! code and carry a one-byte exception code.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use rand::Rng;
use sonde_platform::{ProtocolResult, SondeError, SondeResult};
use std::time::Duration;

use crate::codec;
use crate::exchange::{run_exchange, Exchange};
use crate::guard::{ConnectionRequest, GuardedConnection};

/// Read Holding Registers function code.
const FUNCTION_READ_HOLDING: u8 = 0x03;

/// Most registers one request may ask for (Modbus specification).
pub const MAX_REGISTER_COUNT: u16 = 125;

/// Parameters for a Read Holding Registers probe.
#[derive(Debug, Clone)]
pub struct ModbusParams {
    /// Destination hostname or literal IP address.
    pub host: String,
    /// Destination port, usually 502.
    pub port: u16,
    /// Modbus unit (slave) identifier.
    pub unit_id: u8,
    /// First register address.
    pub start_address: u16,
    /// Number of registers, 1 to 125.
    pub count: u16,
    /// Total budget in milliseconds.
    pub timeout_ms: u64,
}

/// Reads holding registers from a Modbus/TCP server.
pub async fn read_holding_registers(params: &ModbusParams) -> ProtocolResult<Vec<u16>> {
    let request = ConnectionRequest::new(
        params.host.clone(),
        params.port,
        Duration::from_millis(params.timeout_ms),
    );
    let exchange = ReadHoldingRegisters {
        unit_id: params.unit_id,
        start_address: params.start_address,
        count: params.count,
    };
    run_exchange(&request, exchange).await
}

struct ReadHoldingRegisters {
    unit_id: u8,
    start_address: u16,
    count: u16,
}

impl ReadHoldingRegisters {
    fn encode(&self, transaction_id: u16) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_u16(transaction_id);
        buf.put_u16(0); // protocol id
        buf.put_u16(6); // unit id + function + address + count
        buf.put_u8(self.unit_id);
        buf.put_u8(FUNCTION_READ_HOLDING);
        buf.put_u16(self.start_address);
        buf.put_u16(self.count);
        buf.to_vec()
    }

    fn decode(&self, transaction_id: u16, response: &[u8]) -> SondeResult<Vec<u16>> {
        let (echoed, offset) = codec::read_u16_be(response, 0)?;
        if echoed != transaction_id {
            return Err(SondeError::UnexpectedMessage(format!(
                "transaction id mismatch: sent {}, got {}",
                transaction_id, echoed
            )));
        }
        let (protocol_id, offset) = codec::read_u16_be(response, offset)?;
        if protocol_id != 0 {
            return Err(SondeError::Parse(format!(
                "protocol id {} is not Modbus",
                protocol_id
            )));
        }
        let (length, offset) = codec::read_u16_be(response, offset)?;
        if response.len() < offset + length as usize {
            return Err(SondeError::Parse(format!(
                "MBAP declares {} bytes, {} present",
                length,
                response.len() - offset
            )));
        }

        let (_unit_id, offset) = codec::read_u8(response, offset)?;
        let (function, offset) = codec::read_u8(response, offset)?;

        if function == FUNCTION_READ_HOLDING | 0x80 {
            let (exception, _) = codec::read_u8(response, offset)?;
            return Err(SondeError::UnexpectedMessage(format!(
                "Modbus exception {:#04x} for function {:#04x}",
                exception, FUNCTION_READ_HOLDING
            )));
        }
        if function != FUNCTION_READ_HOLDING {
            return Err(SondeError::UnexpectedMessage(format!(
                "unexpected function code {:#04x}",
                function
            )));
        }

        let (byte_count, mut offset) = codec::read_u8(response, offset)?;
        if byte_count as usize != self.count as usize * 2 {
            return Err(SondeError::Parse(format!(
                "expected {} register bytes, server declared {}",
                self.count * 2,
                byte_count
            )));
        }

        let mut registers = Vec::with_capacity(self.count as usize);
        for _ in 0..self.count {
            let (value, next) = codec::read_u16_be(response, offset)?;
            registers.push(value);
            offset = next;
        }
        Ok(registers)
    }
}

#[async_trait]
impl Exchange for ReadHoldingRegisters {
    type Output = Vec<u16>;

    fn validate(&self) -> SondeResult<()> {
        if self.count == 0 || self.count > MAX_REGISTER_COUNT {
            return Err(SondeError::Validation(format!(
                "Register count must be between 1 and {}",
                MAX_REGISTER_COUNT
            )));
        }
        Ok(())
    }

    async fn run(&mut self, conn: &mut GuardedConnection) -> SondeResult<Vec<u16>> {
        let transaction_id: u16 = rand::thread_rng().gen();
        conn.write_all(&self.encode(transaction_id)).await?;

        // MBAP header first, then exactly the declared remainder.
        let header = conn.read_exact(7).await?;
        let (length, _) = codec::read_u16_be(&header, 4)?;
        if length < 2 {
            return Err(SondeError::Parse(format!(
                "MBAP length {} too small",
                length
            )));
        }
        let rest = conn.read_exact(length as usize - 1).await?;

        let mut response = header;
        response.extend_from_slice(&rest);
        self.decode(transaction_id, &response)
    }
}
