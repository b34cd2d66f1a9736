//! Application connection: the request engine
//!
//! Binds client and logical-device addresses to a [`DlmsConnection`] and
//! drives get/set/action as request/reply exchanges, demultiplexed by
//! invoke-id. Handles inbound block transfer on GET and outbound block
//! transfer on SET.

use crate::connection::DlmsConnection;
use cosem_application::{
    get::decode_result_list, ActionRequestNormal, ActionResponseNormal, AttributeDescriptor,
    GetDataBlock, GetRequest, GetResponse, GetResult, InvokeIdAndPriority, MethodDescriptor,
    SelectiveAccess, SetRequest, SetResponse,
};
use cosem_asn1::{AxdrDecoder, AxdrEncoder};
use cosem_core::{CosemError, CosemResult, DlmsData};
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Pool of the sixteen invoke-ids of one application association.
///
/// Ids are taken at dispatch and returned when the final response for
/// them has been drained; when all are in flight, callers queue.
struct InvokeIdPool {
    available: Mutex<Vec<u8>>,
    released: Notify,
}

impl InvokeIdPool {
    fn new() -> Self {
        Self {
            available: Mutex::new((0..16).rev().collect()),
            released: Notify::new(),
        }
    }

    async fn acquire(pool: &Arc<InvokeIdPool>) -> InvokeIdGuard {
        loop {
            if let Some(id) = pool.available.lock().unwrap().pop() {
                return InvokeIdGuard {
                    pool: Arc::clone(pool),
                    id,
                };
            }
            pool.released.notified().await;
        }
    }
}

/// Returns its invoke-id to the pool when the exchange is over.
struct InvokeIdGuard {
    pool: Arc<InvokeIdPool>,
    id: u8,
}

impl Drop for InvokeIdGuard {
    fn drop(&mut self) {
        self.pool.available.lock().unwrap().push(self.id);
        self.pool.released.notify_one();
    }
}

/// An application association with one logical device.
///
/// Holds a shared handle to its [`DlmsConnection`]; the connection
/// outlives it and may be closed through either.
#[derive(Clone)]
pub struct AppConnection {
    conn: DlmsConnection,
    client_address: u16,
    logical_device: u16,
    invoke_ids: Arc<InvokeIdPool>,
    block_length: usize,
    reply_delay: Option<Duration>,
}

impl std::fmt::Debug for AppConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConnection")
            .field("client_address", &self.client_address)
            .field("logical_device", &self.logical_device)
            .field("block_length", &self.block_length)
            .field("reply_delay", &self.reply_delay)
            .finish()
    }
}

impl AppConnection {
    pub fn new(conn: DlmsConnection, client_address: u16, logical_device: u16) -> Self {
        Self {
            conn,
            client_address,
            logical_device,
            invoke_ids: Arc::new(InvokeIdPool::new()),
            block_length: 0,
            reply_delay: None,
        }
    }

    /// Slice size for outbound SET block transfer; 0 disables blocking.
    pub fn set_block_length(&mut self, block_length: usize) {
        self.block_length = block_length;
    }

    /// Pause between consecutive exchanges, for meters that need breathing
    /// room after every reply.
    pub fn set_reply_delay(&mut self, reply_delay: Option<Duration>) {
        self.reply_delay = reply_delay;
    }

    pub fn connection(&self) -> &DlmsConnection {
        &self.conn
    }

    /// Close the underlying connection.
    pub async fn close(&self) -> CosemResult<()> {
        self.conn.close().await
    }

    async fn exchange(&self, pdu: &[u8]) -> CosemResult<Vec<u8>> {
        let reply = self
            .conn
            .request(self.client_address, self.logical_device, pdu)
            .await?;
        if let Some(delay) = self.reply_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(reply)
    }

    fn check_invoke(reply: InvokeIdAndPriority, expected: u8) -> CosemResult<()> {
        if reply.invoke_id() != expected {
            return Err(CosemError::Protocol(format!(
                "response invoke-id {} does not match request invoke-id {}",
                reply.invoke_id(),
                expected
            )));
        }
        Ok(())
    }

    /// Read one attribute.
    pub async fn get(
        &self,
        attribute: AttributeDescriptor,
        access: Option<SelectiveAccess>,
    ) -> CosemResult<GetResult> {
        let guard = InvokeIdPool::acquire(&self.invoke_ids).await;
        let invoke = InvokeIdAndPriority::new(guard.id, false)?;
        let request = GetRequest::Normal {
            invoke,
            attribute,
            access,
        }
        .encode()?;

        let reply = self.exchange(&request).await?;
        match GetResponse::decode(&reply)? {
            GetResponse::Normal {
                invoke: reply_invoke,
                result,
            } => {
                Self::check_invoke(reply_invoke, guard.id)?;
                Ok(result)
            }
            GetResponse::WithDataBlock {
                invoke: reply_invoke,
                block,
            } => {
                Self::check_invoke(reply_invoke, guard.id)?;
                match self.receive_blocks(invoke, block).await? {
                    BlockOutcome::Failed(access_result) => Ok(GetResult::failure(access_result)),
                    BlockOutcome::Data(raw) => {
                        let mut decoder = AxdrDecoder::new(&raw);
                        Ok(GetResult::success(decoder.read_data()?))
                    }
                }
            }
            GetResponse::WithList { .. } => Err(CosemError::Protocol(
                "with-list response to a normal get".into(),
            )),
        }
    }

    /// Read several attributes in one request; results keep per-entry
    /// access outcomes.
    pub async fn get_list(
        &self,
        attributes: Vec<(AttributeDescriptor, Option<SelectiveAccess>)>,
    ) -> CosemResult<Vec<GetResult>> {
        if attributes.is_empty() {
            return Err(CosemError::Protocol("empty get-with-list".into()));
        }

        let guard = InvokeIdPool::acquire(&self.invoke_ids).await;
        let invoke = InvokeIdAndPriority::new(guard.id, false)?;
        let request = GetRequest::WithList { invoke, attributes }.encode()?;

        let reply = self.exchange(&request).await?;
        match GetResponse::decode(&reply)? {
            GetResponse::WithList {
                invoke: reply_invoke,
                results,
            } => {
                Self::check_invoke(reply_invoke, guard.id)?;
                Ok(results)
            }
            GetResponse::WithDataBlock {
                invoke: reply_invoke,
                block,
            } => {
                Self::check_invoke(reply_invoke, guard.id)?;
                match self.receive_blocks(invoke, block).await? {
                    BlockOutcome::Failed(access_result) => Err(CosemError::Protocol(format!(
                        "blocked list response failed with data access result {}",
                        access_result
                    ))),
                    BlockOutcome::Data(raw) => {
                        let mut decoder = AxdrDecoder::new(&raw);
                        decode_result_list(&mut decoder)
                    }
                }
            }
            GetResponse::Normal { .. } => Err(CosemError::Protocol(
                "normal response to a get-with-list".into(),
            )),
        }
    }

    /// Write one attribute; returns the data access result byte.
    pub async fn set(
        &self,
        attribute: AttributeDescriptor,
        access: Option<SelectiveAccess>,
        data: DlmsData,
    ) -> CosemResult<u8> {
        let guard = InvokeIdPool::acquire(&self.invoke_ids).await;
        let invoke = InvokeIdAndPriority::new(guard.id, false)?;

        let mut encoded = AxdrEncoder::new();
        encoded.write_data(&data)?;
        let encoded = encoded.into_bytes();

        if self.block_length > 0 && encoded.len() > self.block_length {
            let mut slices = encoded.chunks(self.block_length);
            let first = slices.next().unwrap_or(&[]);
            let remaining: Vec<&[u8]> = slices.collect();
            let request = SetRequest::FirstBlock {
                invoke,
                attribute,
                access,
                last_block: remaining.is_empty(),
                block_number: 1,
                raw_data: first.to_vec(),
            }
            .encode()?;
            let final_response = self.send_blocks(invoke, guard.id, request, &remaining).await?;
            match final_response {
                SetResponse::ForLastDataBlock { access_result, .. } => Ok(access_result),
                other => Err(CosemError::Protocol(format!(
                    "unexpected final set response {:?}",
                    other
                ))),
            }
        } else {
            let request = SetRequest::Normal {
                invoke,
                attribute,
                access,
                data,
            }
            .encode()?;
            let reply = self.exchange(&request).await?;
            match SetResponse::decode(&reply)? {
                SetResponse::Normal {
                    invoke: reply_invoke,
                    access_result,
                } => {
                    Self::check_invoke(reply_invoke, guard.id)?;
                    Ok(access_result)
                }
                other => Err(CosemError::Protocol(format!(
                    "unexpected set response {:?}",
                    other
                ))),
            }
        }
    }

    /// Write several attributes in one request; returns one data access
    /// result byte per entry.
    pub async fn set_list(
        &self,
        attributes: Vec<(AttributeDescriptor, Option<SelectiveAccess>)>,
        data: Vec<DlmsData>,
    ) -> CosemResult<Vec<u8>> {
        if attributes.is_empty() || attributes.len() != data.len() {
            return Err(CosemError::Protocol(
                "set-with-list needs matching descriptor and value counts".into(),
            ));
        }

        let guard = InvokeIdPool::acquire(&self.invoke_ids).await;
        let invoke = InvokeIdAndPriority::new(guard.id, false)?;

        let mut encoded = AxdrEncoder::new();
        encoded.write_length(data.len())?;
        for value in &data {
            encoded.write_data(value)?;
        }
        let encoded = encoded.into_bytes();

        if self.block_length > 0 && encoded.len() > self.block_length {
            let mut slices = encoded.chunks(self.block_length);
            let first = slices.next().unwrap_or(&[]);
            let remaining: Vec<&[u8]> = slices.collect();
            let request = SetRequest::WithListFirstBlock {
                invoke,
                attributes,
                last_block: remaining.is_empty(),
                block_number: 1,
                raw_data: first.to_vec(),
            }
            .encode()?;
            let final_response = self.send_blocks(invoke, guard.id, request, &remaining).await?;
            match final_response {
                SetResponse::ForLastDataBlockWithList { access_results, .. } => Ok(access_results),
                other => Err(CosemError::Protocol(format!(
                    "unexpected final set response {:?}",
                    other
                ))),
            }
        } else {
            let request = SetRequest::WithList {
                invoke,
                attributes,
                data,
            }
            .encode()?;
            let reply = self.exchange(&request).await?;
            match SetResponse::decode(&reply)? {
                SetResponse::WithList {
                    invoke: reply_invoke,
                    access_results,
                } => {
                    Self::check_invoke(reply_invoke, guard.id)?;
                    Ok(access_results)
                }
                other => Err(CosemError::Protocol(format!(
                    "unexpected set response {:?}",
                    other
                ))),
            }
        }
    }

    /// Invoke a method; returns the action result byte and the optional
    /// return value.
    pub async fn action(
        &self,
        method: MethodDescriptor,
        parameters: Option<DlmsData>,
    ) -> CosemResult<(u8, Option<DlmsData>)> {
        let guard = InvokeIdPool::acquire(&self.invoke_ids).await;
        let invoke = InvokeIdAndPriority::new(guard.id, false)?;
        let request = ActionRequestNormal {
            invoke,
            method,
            parameters,
        }
        .encode()?;

        let reply = self.exchange(&request).await?;
        let response = ActionResponseNormal::decode(&reply)?;
        Self::check_invoke(response.invoke, guard.id)?;
        Ok((response.action_result, response.return_data))
    }

    /// Drive an inbound block transfer to completion.
    ///
    /// Block numbers must increase strictly by one from 1; anything else
    /// is a protocol error.
    async fn receive_blocks(
        &self,
        invoke: InvokeIdAndPriority,
        first: GetDataBlock,
    ) -> CosemResult<BlockOutcome> {
        let mut expected = 1u32;
        let mut block = first;
        let mut assembled: Vec<u8> = Vec::new();

        loop {
            if block.access_result != 0 {
                return Ok(BlockOutcome::Failed(block.access_result));
            }
            if block.block_number != expected {
                return Err(CosemError::Protocol(format!(
                    "data block {} received, expected {}",
                    block.block_number, expected
                )));
            }
            assembled.extend_from_slice(&block.raw_data);
            debug!(
                "received data block {} ({} bytes, last: {})",
                block.block_number,
                block.raw_data.len(),
                block.last_block
            );
            if block.last_block {
                return Ok(BlockOutcome::Data(assembled));
            }

            let next = GetRequest::Next {
                invoke,
                block_number: block.block_number,
            }
            .encode()?;
            let reply = self.exchange(&next).await?;
            match GetResponse::decode(&reply)? {
                GetResponse::WithDataBlock {
                    invoke: reply_invoke,
                    block: next_block,
                } => {
                    Self::check_invoke(reply_invoke, invoke.invoke_id())?;
                    block = next_block;
                    expected += 1;
                }
                other => {
                    return Err(CosemError::Protocol(format!(
                        "unexpected response {:?} during block transfer",
                        other
                    )))
                }
            }
        }
    }

    /// Drive an outbound block transfer: wait for the intermediate ack of
    /// every block before sending the next, return the final response.
    async fn send_blocks(
        &self,
        invoke: InvokeIdAndPriority,
        invoke_id: u8,
        first_request: Vec<u8>,
        remaining: &[&[u8]],
    ) -> CosemResult<SetResponse> {
        let mut reply = self.exchange(&first_request).await?;
        let mut sent_number = 1u32;

        for (index, slice) in remaining.iter().enumerate() {
            match SetResponse::decode(&reply)? {
                SetResponse::ForDataBlock {
                    invoke: reply_invoke,
                    block_number,
                } => {
                    Self::check_invoke(reply_invoke, invoke_id)?;
                    if block_number != sent_number {
                        return Err(CosemError::Protocol(format!(
                            "server acknowledged block {}, expected {}",
                            block_number, sent_number
                        )));
                    }
                }
                other => {
                    return Err(CosemError::Protocol(format!(
                        "unexpected response {:?} to an intermediate set block",
                        other
                    )))
                }
            }

            sent_number += 1;
            let request = SetRequest::WithDataBlock {
                invoke,
                last_block: index + 1 == remaining.len(),
                block_number: sent_number,
                raw_data: slice.to_vec(),
            }
            .encode()?;
            debug!("sending set data block {}", sent_number);
            reply = self.exchange(&request).await?;
        }

        let response = SetResponse::decode(&reply)?;
        Self::check_invoke(response.invoke(), invoke_id)?;
        Ok(response)
    }
}

enum BlockOutcome {
    Data(Vec<u8>),
    Failed(u8),
}
