use {
    super::{
        client::WsClient,
        collaborators::{ChainDb, DbError, ALL_SHAS},
        commands,
        constants::RESCAN_PROGRESS_INTERVAL_SECS,
        errors::err_rescan_reorg,
    },
    crate::{
        btcjson::{
            block_details, new_recv_tx_ntfn, new_redeeming_tx_ntfn, new_rescan_finished_ntfn,
            new_rescan_progress_ntfn, rpc_decode_hex_error, RescanCmd, RpcError,
            ERR_RPC_BLOCK_NOT_FOUND, ERR_RPC_DATABASE, ERR_RPC_INVALID_ADDRESS_OR_KEY,
        },
        btcutil::{hash160, Address, Block},
        chaincfg::chainhash::Hash,
        wire::OutPoint,
    },
    log::{debug, error, info, warn},
    std::{collections::HashSet, sync::Arc},
    tokio::time::{Duration, Instant},
};

/// The lookup keys built once per rescan from the client's request.  The
/// unspent set is seeded from the request outpoints and mutated as outputs
/// paying to watched keys are discovered and spent during the walk.
#[derive(Default)]
struct RescanKeys {
    fallbacks: HashSet<String>,
    pub_key_hashes: HashSet<[u8; 20]>,
    script_hashes: HashSet<[u8; 20]>,
    compressed_pub_keys: HashSet<[u8; 33]>,
    uncompressed_pub_keys: HashSet<[u8; 65]>,
    unspent: HashSet<OutPoint>,
}

impl RescanKeys {
    /// Returns the currently-unspent outpoints for the rescan lookup keys.
    /// This is primarily intended to be used to register outpoints for
    /// continuous notifications after a rescan has completed.
    fn unspent_slice(&self) -> Vec<OutPoint> {
        self.unspent.iter().copied().collect()
    }
}

fn db_rpc_error(e: DbError) -> RpcError {
    RpcError::new(ERR_RPC_DATABASE, format!("Database error: {}", e))
}

/// Returns the appropriate JSON-RPC error if a current block fetched during
/// a reorganize is not a direct child of the parent block hash.
fn descendant_block(prev_hash: &Hash, cur_block: &Block) -> Result<(), RpcError> {
    let cur_hash = &cur_block.msg_block().header.prev_block;
    if !prev_hash.is_equal(cur_hash) {
        error!(
            "Stopping rescan for reorged block {} (replaced by block {})",
            prev_hash.string(),
            cur_hash.string()
        );
        return Err(err_rescan_reorg());
    }

    Ok(())
}

/// Attempts to recover from a detected reorganize during a rescan.  It
/// fetches a new range of block hashes from the store and verifies that the
/// new range of blocks is on the same fork as a previous range of blocks.
/// If this condition does not hold true, the JSON-RPC error for an
/// unrecoverable reorganize is returned.
async fn recover_from_reorg(
    db: &dyn ChainDb,
    min_block: i32,
    max_block: i32,
    last_block: Option<&Hash>,
) -> Result<Vec<Hash>, RpcError> {
    let hash_list = match db.fetch_height_range(min_block, max_block).await {
        Ok(hash_list) => hash_list,

        Err(e) => {
            error!("Error looking up block range: {}", e);
            return Err(db_rpc_error(e));
        }
    };

    let last_block = match last_block {
        Some(last_block) => last_block,

        None => return Ok(hash_list),
    };
    if hash_list.is_empty() {
        return Ok(hash_list);
    }

    let blk = match db.fetch_block_by_sha(&hash_list[0]).await {
        Ok(blk) => blk,

        Err(e) => {
            error!("Error looking up possibly reorged block: {}", e);
            return Err(db_rpc_error(e));
        }
    };
    descendant_block(last_block, &blk)?;

    Ok(hash_list)
}

/// Rescans all transactions in a single block, queueing redeemingtx
/// notifications for inputs spending a tracked unspent outpoint and recvtx
/// notifications for outputs paying to a watched key.  An error is returned
/// only when the websocket client disconnected, which callers use to stop
/// the rescan early.
async fn rescan_block(
    wsc: &Arc<WsClient>,
    lookups: &mut RescanKeys,
    blk: &Block,
) -> Result<(), super::RpcServerError> {
    for tx in blk.transactions() {
        // Hexadecimal representation of this tx.  Only created if needed,
        // and reused for later notifications if already made.
        let mut tx_hex = String::new();

        // All inputs and outputs must be iterated through to correctly
        // modify the unspent map, however, just a single notification for
        // any matching transaction inputs or outputs should be created and
        // sent.
        let mut spent_notified = false;
        let mut recv_notified = false;

        for txin in tx.msg_tx().tx_in.iter() {
            if lookups.unspent.remove(&txin.previous_out_point) {
                if spent_notified {
                    continue;
                }

                if tx_hex.is_empty() {
                    tx_hex = tx.hex();
                }
                let marshalled = match new_redeeming_tx_ntfn(
                    &tx_hex,
                    block_details(Some(blk), tx.index()).as_ref(),
                ) {
                    Ok(marshalled) => marshalled,

                    Err(e) => {
                        error!("Failed to marshal redeemingtx notification: {}", e);
                        continue;
                    }
                };

                // Stop the rescan early if the websocket client
                // disconnected.
                wsc.queue_notification(marshalled).await?;
                spent_notified = true;
            }
        }

        for (tx_out_idx, txout) in tx.msg_tx().tx_out.iter().enumerate() {
            let addrs = wsc
                .server
                .script_parser
                .extract_pk_script_addrs(&txout.pk_script, &wsc.server.config.chain_params);

            for addr in addrs {
                let matched = match addr {
                    Address::PubKeyHash { ref hash, .. } => lookups.pub_key_hashes.contains(hash),

                    Address::ScriptHash { ref hash, .. } => lookups.script_hashes.contains(hash),

                    Address::PubKey { ref key, .. } => {
                        let found = match key.len() {
                            // Compressed.
                            33 => {
                                let mut serialized = [0u8; 33];
                                serialized.copy_from_slice(key);
                                lookups.compressed_pub_keys.contains(&serialized)
                            }

                            // Uncompressed.
                            65 => {
                                let mut serialized = [0u8; 65];
                                serialized.copy_from_slice(key);
                                lookups.uncompressed_pub_keys.contains(&serialized)
                            }

                            len => {
                                warn!(
                                    "Skipping rescanned pubkey of unknown serialized length {}",
                                    len
                                );
                                continue;
                            }
                        };

                        // If the transaction output pays to the pubkey of a
                        // rescanned P2PKH address, include it as well.
                        if found {
                            true
                        } else {
                            lookups.pub_key_hashes.contains(&hash160(key))
                        }
                    }

                    // A new address type must have been added.  Match
                    // against the encoded payment address in the fallback
                    // set.
                    Address::Other { .. } => lookups.fallbacks.contains(&addr.encode_address()),
                };
                if !matched {
                    continue;
                }

                let outpoint = OutPoint::new(*tx.hash(), tx_out_idx as u32);
                lookups.unspent.insert(outpoint);

                if recv_notified {
                    continue;
                }

                if tx_hex.is_empty() {
                    tx_hex = tx.hex();
                }
                let marshalled = match new_recv_tx_ntfn(
                    &tx_hex,
                    block_details(Some(blk), tx.index()).as_ref(),
                ) {
                    Ok(marshalled) => marshalled,

                    Err(e) => {
                        error!("Failed to marshal recvtx notification: {}", e);
                        return Ok(());
                    }
                };

                // Stop the rescan early if the websocket client
                // disconnected.
                wsc.queue_notification(marshalled).await?;
                recv_notified = true;
            }
        }
    }

    Ok(())
}

/// Implements the rescan command extension for websocket connections.
///
/// NOTE: This does not smartly handle reorgs.  It will, however, detect
/// whether a reorg removed a block that was previously processed, and result
/// in the handler erroring.  Clients must handle this by finding a block
/// still in the chain (perhaps from a rescanprogress notification) to resume
/// their rescan.
pub(crate) async fn handle_rescan(
    wsc: &Arc<WsClient>,
    cmd: &RescanCmd,
) -> Result<Option<serde_json::Value>, RpcError> {
    let outpoints = commands::deserialize_outpoints(&cmd.out_points)?;

    let num_addrs = cmd.addresses.len();
    if num_addrs == 1 {
        info!("Beginning rescan for 1 address");
    } else {
        info!("Beginning rescan for {} addresses", num_addrs);
    }

    // Build lookup maps.
    let mut lookups = RescanKeys::default();
    let chain_params = wsc.server.config.chain_params;
    for addr_str in cmd.addresses.iter() {
        let addr = Address::decode(addr_str, &chain_params).map_err(|e| {
            RpcError::new(
                ERR_RPC_INVALID_ADDRESS_OR_KEY,
                format!("Rescan address {}: {}", addr_str, e),
            )
        })?;

        match addr {
            Address::PubKeyHash { hash, .. } => {
                lookups.pub_key_hashes.insert(hash);
            }

            Address::ScriptHash { hash, .. } => {
                lookups.script_hashes.insert(hash);
            }

            Address::PubKey { ref key, .. } => match key.len() {
                // Compressed.
                33 => {
                    let mut serialized = [0u8; 33];
                    serialized.copy_from_slice(key);
                    lookups.compressed_pub_keys.insert(serialized);
                }

                // Uncompressed.
                65 => {
                    let mut serialized = [0u8; 65];
                    serialized.copy_from_slice(key);
                    lookups.uncompressed_pub_keys.insert(serialized);
                }

                _ => {
                    return Err(RpcError::new(
                        ERR_RPC_INVALID_ADDRESS_OR_KEY,
                        format!("Pubkey {} is of unknown length", addr_str),
                    ));
                }
            },

            // A new address type must have been added.  Use the encoded
            // payment address string as a fallback until a fast path is
            // added.
            Address::Other { .. } => {
                lookups.fallbacks.insert(addr_str.clone());
            }
        }
    }
    for outpoint in outpoints {
        lookups.unspent.insert(outpoint);
    }

    let db = wsc.server.db.clone();

    let min_block_sha =
        Hash::new_from_str(&cmd.begin_block).map_err(|_| rpc_decode_hex_error(&cmd.begin_block))?;
    let mut min_block = db
        .fetch_block_height_by_sha(&min_block_sha)
        .await
        .map_err(|e| {
            RpcError::new(ERR_RPC_BLOCK_NOT_FOUND, format!("Error getting block: {}", e))
        })?;

    let mut max_block = ALL_SHAS;
    if let Some(ref end_block) = cmd.end_block {
        let max_block_sha =
            Hash::new_from_str(end_block).map_err(|_| rpc_decode_hex_error(end_block))?;
        max_block = db
            .fetch_block_height_by_sha(&max_block_sha)
            .await
            .map_err(|e| {
                RpcError::new(ERR_RPC_BLOCK_NOT_FOUND, format!("Error getting block: {}", e))
            })?;
    }

    // last_block and last_block_hash track the previously-rescanned block.
    // They are None when no previous blocks have been rescanned.
    let mut last_block: Option<Block> = None;
    let mut last_block_hash: Option<Hash> = None;

    // Wait at least this long between rescanprogress notifications to the
    // websocket client.
    let progress_interval = Duration::from_secs(RESCAN_PROGRESS_INTERVAL_SECS);
    let mut last_progress = Instant::now();

    // The store may not return a complete list of block hashes for the
    // given range, so fetch the range as many times as necessary.
    'fetch_range: while min_block < max_block {
        let mut hash_list = match db.fetch_height_range(min_block, max_block).await {
            Ok(hash_list) => hash_list,

            Err(e) => {
                error!("Error looking up block range: {}", e);
                return Err(db_rpc_error(e));
            }
        };

        if hash_list.is_empty() {
            // The rescan is finished if no block hashes for this range were
            // successfully fetched and a stop block was provided.
            if max_block != ALL_SHAS {
                break;
            }

            // If the rescan is through the current block, set up the client
            // to continue to receive notifications regarding all rescanned
            // addresses and the current set of unspent outputs.
            //
            // This is done safely by temporarily grabbing exclusive access
            // of the block manager.  If no more blocks have been attached
            // between this pause and the fetch above, then it is safe to
            // register the websocket client for continuous notifications.
            // Otherwise, continue the fetch loop again to rescan the new
            // blocks (or error due to an irrecoverable reorganize).
            let pause_guard = wsc.server.block_manager.pause().await;
            let newest = db.newest_sha().await;
            let mut again = true;
            if let Ok((ref cur_hash, _)) = newest {
                if last_block_hash.is_none() || last_block_hash.as_ref() == Some(cur_hash) {
                    again = false;
                    let n = &wsc.server.ntfn_mgr;
                    n.register_spent_requests(wsc.clone(), lookups.unspent_slice())
                        .await;
                    n.register_tx_out_address_requests(wsc.clone(), cmd.addresses.clone())
                        .await;
                }
            }
            drop(pause_guard);

            if let Err(e) = newest {
                error!("Error fetching best block hash: {}", e);
                return Err(db_rpc_error(e));
            }
            if again {
                continue;
            }
            break;
        }

        let mut i = 0;
        while i < hash_list.len() {
            let blk = match db.fetch_block_by_sha(&hash_list[i]).await {
                Ok(blk) => blk,

                Err(e) => {
                    // Only handle reorgs if a block could not be found for
                    // the hash.
                    if !matches!(e, DbError::BlockShaMissing) {
                        error!("Error looking up block: {}", e);
                        return Err(db_rpc_error(e));
                    }

                    // If an absolute max block was specified, don't attempt
                    // to handle the reorg.
                    if max_block != ALL_SHAS {
                        error!(
                            "Stopping rescan for reorged block {}",
                            cmd.end_block.as_deref().unwrap_or_default()
                        );
                        return Err(err_rescan_reorg());
                    }

                    // If the lookup for the previously valid block hash
                    // failed, there may have been a reorg.  Fetch a new
                    // range of block hashes and verify that the previously
                    // processed block (if there was any) still exists in
                    // the store.  If it doesn't, we error.  The inner
                    // iteration restarts at the head of the new range.
                    min_block += i as i32;
                    hash_list =
                        recover_from_reorg(&*db, min_block, max_block, last_block_hash.as_ref())
                            .await?;
                    if hash_list.is_empty() {
                        break 'fetch_range;
                    }
                    i = 0;
                    continue;
                }
            };

            if i == 0 {
                if let Some(ref last_hash) = last_block_hash {
                    // Ensure the new hash list is on the same fork as the
                    // last block from the old hash list.
                    descendant_block(last_hash, &blk)?;
                }
            }

            // Stop the rescan if the client requesting it has disconnected.
            if wsc.quit().is_cancelled() {
                debug!(
                    "Stopped rescan at height {} for disconnected client",
                    blk.height()
                );
                return Ok(None);
            }

            let blk_hash = *blk.hash();
            let blk_height = blk.height();
            let blk_time = blk.timestamp();

            if rescan_block(wsc, &mut lookups, &blk).await.is_err() {
                debug!(
                    "Stopped rescan at height {} for disconnected client",
                    blk_height
                );
                return Ok(None);
            }
            last_block_hash = Some(blk_hash);
            last_block = Some(blk);

            // Periodically notify the client of the progress completed.
            if last_progress.elapsed() >= progress_interval {
                last_progress = Instant::now();

                match new_rescan_progress_ntfn(blk_hash.string(), blk_height, blk_time) {
                    Ok(marshalled) => {
                        if wsc.queue_notification(marshalled).await.is_err() {
                            // Finished if the client disconnected.
                            debug!(
                                "Stopped rescan at height {} for disconnected client",
                                blk_height
                            );
                            return Ok(None);
                        }
                    }

                    Err(e) => {
                        error!("Failed to marshal rescan progress notification: {}", e);
                    }
                }
            }

            i += 1;
        }

        min_block += hash_list.len() as i32;
    }

    // Notify the websocket client of the finished rescan.  Due to how the
    // server asynchronously queues notifications to not block calling code,
    // there is no guarantee that any of the notifications created during
    // the rescan (such as rescanprogress, recvtx and redeemingtx) will be
    // received before the rescan RPC returns.  Therefore, another method is
    // needed to safely inform clients that all rescan notifications have
    // been sent.
    let (final_hash, final_height, final_time) = match last_block {
        Some(ref blk) => (blk.hash().string(), blk.height(), blk.timestamp()),

        // No blocks were scanned, which happens when the begin and end
        // blocks are the same.  Report the begin block so the client has a
        // known-good resume point.
        None => {
            let blk = match db.fetch_block_by_sha(&min_block_sha).await {
                Ok(blk) => blk,

                Err(e) => {
                    error!("Error looking up rescan begin block: {}", e);
                    return Err(db_rpc_error(e));
                }
            };
            (blk.hash().string(), blk.height(), blk.timestamp())
        }
    };

    match new_rescan_finished_ntfn(final_hash, final_height, final_time) {
        Ok(marshalled) => {
            // The rescan is finished, so we don't care whether the client
            // has disconnected at this point.
            let _ = wsc.queue_notification(marshalled).await;
        }

        Err(e) => {
            error!("Failed to marshal rescan finished notification: {}", e);
        }
    }

    info!("Finished rescan");
    Ok(None)
}
