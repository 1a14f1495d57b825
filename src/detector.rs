use crate::types::{LogRecord, TransactionRecord, Transfer, TransferKind};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use tracing::warn;

mod erc20 {
    use alloy::sol;
    sol! {
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Approval(address indexed owner, address indexed spender, uint256 value);
    }
}

mod erc1155 {
    use alloy::sol;
    sol! {
        event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
        event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
    }
}

/// Decode every transfer carried by a transaction and its receipt logs.
///
/// Pure function, no I/O. A transaction with value and empty call data is a
/// native transfer; anything else is classified log by log against the known
/// event signatures. Unrecognized topics are ignored; a log that fails to
/// decode is logged and skipped without aborting the transaction.
pub fn detect_transfers(tx: &TransactionRecord, logs: &[LogRecord]) -> Vec<Transfer> {
    if is_native_transfer(tx) {
        return vec![Transfer {
            kind: TransferKind::EthTransfer,
            from: tx.from,
            to: tx.to.unwrap_or(Address::ZERO),
            value: tx.value,
            token_address: Address::ZERO,
            block_number: tx.block_number,
        }];
    }

    let mut transfers = Vec::new();
    for log in logs {
        match decode_log(log, tx.block_number) {
            Ok(decoded) => transfers.extend(decoded),
            Err(e) => {
                warn!(
                    "Failed to decode log from {:?} in tx {}: {}",
                    log.address, tx.hash, e
                );
            }
        }
    }
    transfers
}

pub fn is_native_transfer(tx: &TransactionRecord) -> bool {
    tx.value > U256::ZERO && tx.input.is_empty()
}

fn decode_log(log: &LogRecord, block_number: u64) -> Result<Vec<Transfer>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(Vec::new());
    };

    if *topic0 == erc20::Transfer::SIGNATURE_HASH {
        // Same topic hash for ERC-20 and ERC-721; the indexed token id makes
        // the ERC-721 variant a four-topic log.
        return match log.topics.len() {
            3 => Ok(vec![Transfer {
                kind: TransferKind::Erc20Transfer,
                from: address_from_topic(&log.topics[1]),
                to: address_from_topic(&log.topics[2]),
                value: word(&log.data, 0),
                token_address: log.address,
                block_number,
            }]),
            4 => Ok(vec![Transfer {
                kind: TransferKind::Erc721Transfer,
                from: address_from_topic(&log.topics[1]),
                to: address_from_topic(&log.topics[2]),
                value: U256::from_be_bytes(log.topics[3].0),
                token_address: log.address,
                block_number,
            }]),
            _ => Ok(Vec::new()),
        };
    }

    if *topic0 == erc20::Approval::SIGNATURE_HASH && log.topics.len() == 3 {
        return Ok(vec![Transfer {
            kind: TransferKind::Erc20Approval,
            from: address_from_topic(&log.topics[1]),
            to: address_from_topic(&log.topics[2]),
            value: word(&log.data, 0),
            token_address: log.address,
            block_number,
        }]);
    }

    if *topic0 == erc1155::TransferSingle::SIGNATURE_HASH && log.topics.len() == 4 {
        // Data layout is [id, value]; the amount is the second word.
        return Ok(vec![Transfer {
            kind: TransferKind::Erc1155TransferSingle,
            from: address_from_topic(&log.topics[2]),
            to: address_from_topic(&log.topics[3]),
            value: word(&log.data, 1),
            token_address: log.address,
            block_number,
        }]);
    }

    if *topic0 == erc1155::TransferBatch::SIGNATURE_HASH {
        let event = erc1155::TransferBatch::decode_raw_log(log.topics.iter().copied(), &log.data)?;
        return Ok(event
            .ids
            .iter()
            .zip(event.values.iter())
            .map(|(_id, amount)| Transfer {
                kind: TransferKind::Erc1155TransferBatch,
                from: event.from,
                to: event.to,
                value: *amount,
                token_address: log.address,
                block_number,
            })
            .collect());
    }

    Ok(Vec::new())
}

fn address_from_topic(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}

/// The `index`-th 32-byte word of the log data, zero when absent.
fn word(data: &[u8], index: usize) -> U256 {
    let start = index * 32;
    if data.len() < start + 32 {
        if index == 0 && !data.is_empty() {
            return U256::from_be_slice(data);
        }
        return U256::ZERO;
    }
    U256::from_be_slice(&data[start..start + 32])
}
