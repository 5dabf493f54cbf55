use lispbuf::{BufferError, ReadBuffer, Readable, WriteBuffer, Writeable};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::MapServer,
    constants::DEFAULT_MAPPING_TTL,
    control::{Ctx, Device},
    types::{Address, Locator, LocatorState, MapAction, Mapping},
};

/// Bytes in the fixed management header.
pub const API_HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Truncated management message")]
    Truncated,

    #[error("Unknown device ({0})")]
    UnknownDevice(u8),

    #[error("Unknown target ({0})")]
    UnknownTarget(u8),

    #[error("Unknown operation ({0})")]
    UnknownOperation(u8),

    #[error("Unknown message type ({0})")]
    UnknownMsgType(u8),

    #[error("Invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid address '{0}' in payload")]
    BadAddress(String),

    #[error("Operation not supported on this device role")]
    WrongRole,
}

impl From<BufferError> for ApiError {
    fn from(_: BufferError) -> Self {
        ApiError::Truncated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDevice {
    Xtr,
    Ms,
    Mr,
    Rtr,
    Mn,
}

impl ApiDevice {
    pub fn to_u8(self) -> u8 {
        match self {
            ApiDevice::Xtr => 1,
            ApiDevice::Ms => 2,
            ApiDevice::Mr => 3,
            ApiDevice::Rtr => 4,
            ApiDevice::Mn => 5,
        }
    }
}

impl TryFrom<u8> for ApiDevice {
    type Error = ApiError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ApiDevice::Xtr),
            2 => Ok(ApiDevice::Ms),
            3 => Ok(ApiDevice::Mr),
            4 => Ok(ApiDevice::Rtr),
            5 => Ok(ApiDevice::Mn),
            other => Err(ApiError::UnknownDevice(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiTarget {
    MapCache,
    LocalDb,
    MapServers,
    Petrs,
}

impl ApiTarget {
    pub fn to_u8(self) -> u8 {
        match self {
            ApiTarget::MapCache => 1,
            ApiTarget::LocalDb => 2,
            ApiTarget::MapServers => 3,
            ApiTarget::Petrs => 4,
        }
    }
}

impl TryFrom<u8> for ApiTarget {
    type Error = ApiError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ApiTarget::MapCache),
            2 => Ok(ApiTarget::LocalDb),
            3 => Ok(ApiTarget::MapServers),
            4 => Ok(ApiTarget::Petrs),
            other => Err(ApiError::UnknownTarget(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOperation {
    Create,
    ReadAll,
    Delete,
}

impl ApiOperation {
    pub fn to_u8(self) -> u8 {
        match self {
            ApiOperation::Create => 1,
            ApiOperation::ReadAll => 2,
            ApiOperation::Delete => 3,
        }
    }
}

impl TryFrom<u8> for ApiOperation {
    type Error = ApiError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ApiOperation::Create),
            2 => Ok(ApiOperation::ReadAll),
            3 => Ok(ApiOperation::Delete),
            other => Err(ApiError::UnknownOperation(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMsgType {
    Request,
    Result,
}

impl ApiMsgType {
    pub fn to_u8(self) -> u8 {
        match self {
            ApiMsgType::Request => 1,
            ApiMsgType::Result => 2,
        }
    }
}

impl TryFrom<u8> for ApiMsgType {
    type Error = ApiError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ApiMsgType::Request),
            2 => Ok(ApiMsgType::Result),
            other => Err(ApiError::UnknownMsgType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiResultCode {
    Ok,
    Err,
}

impl ApiResultCode {
    pub fn to_u8(self) -> u8 {
        match self {
            ApiResultCode::Ok => 0,
            ApiResultCode::Err => 1,
        }
    }
}

/// The fixed framing in front of every management request and result.
/// A result's payload is one status byte followed by optional JSON data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiHeader {
    pub device: ApiDevice,
    pub target: ApiTarget,
    pub operation: ApiOperation,
    pub msg_type: ApiMsgType,
    pub datalen: u32,
}

impl Readable for ApiHeader {
    type Error = ApiError;

    fn read(buf: &mut ReadBuffer<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            device: ApiDevice::try_from(u8::read(buf)?)?,
            target: ApiTarget::try_from(u8::read(buf)?)?,
            operation: ApiOperation::try_from(u8::read(buf)?)?,
            msg_type: ApiMsgType::try_from(u8::read(buf)?)?,
            datalen: u32::read(buf)?,
        })
    }
}

impl Writeable for ApiHeader {
    type Error = ApiError;

    fn write(&self, buf: &mut WriteBuffer) -> Result<usize, Self::Error> {
        let mut n = self.device.to_u8().write(buf)?;
        n += self.target.to_u8().write(buf)?;
        n += self.operation.to_u8().write(buf)?;
        n += self.msg_type.to_u8().write(buf)?;
        n += self.datalen.write(buf)?;
        Ok(n)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RlocDto {
    pub address: String,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default = "default_weight")]
    pub weight: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MappingDto {
    pub eid: String,

    #[serde(default = "default_ttl")]
    pub ttl: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default)]
    pub rlocs: Vec<RlocDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EidDto {
    pub eid: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MapServerDto {
    pub address: String,
    pub key: String,

    #[serde(default)]
    pub proxy_reply: bool,
}

fn default_priority() -> u8 {
    1
}

fn default_weight() -> u8 {
    100
}

fn default_ttl() -> u32 {
    DEFAULT_MAPPING_TTL
}

impl MappingDto {
    pub fn from_mapping(mapping: &Mapping) -> Self {
        Self {
            eid: mapping.eid().to_string(),
            ttl: mapping.ttl(),
            action: Some(format!("{:?}", mapping.action())),
            rlocs: mapping
                .locators()
                .iter()
                .map(|l| RlocDto {
                    address: l.address().to_string(),
                    priority: l.priority(),
                    weight: l.weight(),
                    state: Some(format!("{:?}", l.state())),
                })
                .collect(),
        }
    }

    fn to_mapping(&self, local: bool) -> Result<Mapping, ApiError> {
        let eid: Address = self
            .eid
            .parse()
            .map_err(|_| ApiError::BadAddress(self.eid.clone()))?;

        let mut mapping = Mapping::new(eid, self.ttl);
        if let Some(action) = &self.action {
            mapping.set_action(match action.as_str() {
                "NativelyForward" => MapAction::NativelyForward,
                "SendMapRequest" => MapAction::SendMapRequest,
                "Drop" => MapAction::Drop,
                _ => MapAction::NoAction,
            });
        }

        for rloc in &self.rlocs {
            let addr: Address = rloc
                .address
                .parse()
                .map_err(|_| ApiError::BadAddress(rloc.address.clone()))?;
            let locator = if local {
                Locator::local(addr, LocatorState::Up, rloc.priority, rloc.weight, None)
            } else {
                Locator::remote(addr, LocatorState::Up, rloc.priority, rloc.weight)
            };
            let _ = mapping.add_locator(locator);
        }
        Ok(mapping)
    }
}

/// Handle one management request frame and produce the result frame.
/// Requests run synchronously on the event-loop thread; errors become an
/// Err result, never a dropped connection.
pub fn handle_request(device: &mut Device, ctx: &mut Ctx<'_>, raw: &[u8]) -> Vec<u8> {
    let mut buf = ReadBuffer::new(raw);

    let header = match ApiHeader::read(&mut buf) {
        Ok(h) => h,
        Err(err) => {
            warn!(%err, "malformed management header");
            return result_frame(
                ApiHeader {
                    device: ApiDevice::Xtr,
                    target: ApiTarget::MapCache,
                    operation: ApiOperation::ReadAll,
                    msg_type: ApiMsgType::Result,
                    datalen: 0,
                },
                ApiResultCode::Err,
                &[],
            );
        }
    };

    let payload = match buf.read_slice(header.datalen as usize) {
        Ok(p) => p,
        Err(_) => {
            warn!("management payload shorter than datalen");
            return result_frame(header, ApiResultCode::Err, &[]);
        }
    };

    match apply(device, ctx, &header, payload) {
        Ok(data) => result_frame(header, ApiResultCode::Ok, &data),
        Err(err) => {
            warn!(%err, "management request failed");
            result_frame(header, ApiResultCode::Err, &[])
        }
    }
}

fn result_frame(mut header: ApiHeader, code: ApiResultCode, data: &[u8]) -> Vec<u8> {
    header.msg_type = ApiMsgType::Result;
    header.datalen = (1 + data.len()) as u32;

    let mut buf = WriteBuffer::new();
    // Header serialization of plain enums cannot fail on a fresh buffer.
    let _ = header.write(&mut buf);
    buf.push(code.to_u8());
    let _ = buf.write_slice(data);
    buf.into_bytes()
}

fn apply(
    device: &mut Device,
    ctx: &mut Ctx<'_>,
    header: &ApiHeader,
    payload: &[u8],
) -> Result<Vec<u8>, ApiError> {
    debug!(?header, "management request");

    match (header.target, header.operation) {
        (ApiTarget::MapCache, ApiOperation::ReadAll) => {
            let cache = device.map_cache().ok_or(ApiError::WrongRole)?;
            let dtos: Vec<MappingDto> = cache
                .entries()
                .into_iter()
                .map(|e| MappingDto::from_mapping(e.mapping()))
                .collect();
            Ok(serde_json::to_vec(&dtos)?)
        }
        (ApiTarget::MapCache, ApiOperation::Create) => {
            let dto: MappingDto = serde_json::from_slice(payload)?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            if dto.rlocs.is_empty() {
                // No locators given: resolve through the mapping system
                // instead of installing a static entry.
                let eid: Address = dto
                    .eid
                    .parse()
                    .map_err(|_| ApiError::BadAddress(dto.eid.clone()))?;
                xtr.resolve(ctx, &eid, false);
            } else {
                let mapping = dto.to_mapping(false)?;
                xtr.map_cache_mut().install(mapping, ctx.wheel);
            }
            Ok(Vec::new())
        }
        (ApiTarget::MapCache, ApiOperation::Delete) => {
            let dto: EidDto = serde_json::from_slice(payload)?;
            let eid: Address = dto
                .eid
                .parse()
                .map_err(|_| ApiError::BadAddress(dto.eid.clone()))?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.map_cache_mut().remove(&eid, ctx.wheel);
            Ok(Vec::new())
        }
        (ApiTarget::LocalDb, ApiOperation::ReadAll) => {
            let db = device.local_db().ok_or(ApiError::WrongRole)?;
            let dtos: Vec<MappingDto> = db
                .mappings()
                .into_iter()
                .map(MappingDto::from_mapping)
                .collect();
            Ok(serde_json::to_vec(&dtos)?)
        }
        (ApiTarget::LocalDb, ApiOperation::Create) => {
            let dto: MappingDto = serde_json::from_slice(payload)?;
            let mapping = dto.to_mapping(true)?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.local_db_mut().add_mapping(mapping);
            // A new authoritative prefix is registered right away.
            xtr.send_registers(ctx);
            Ok(Vec::new())
        }
        (ApiTarget::LocalDb, ApiOperation::Delete) => {
            let dto: EidDto = serde_json::from_slice(payload)?;
            let eid: Address = dto
                .eid
                .parse()
                .map_err(|_| ApiError::BadAddress(dto.eid.clone()))?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.local_db_mut().remove(&eid.into_prefix().normalize());
            Ok(Vec::new())
        }
        (ApiTarget::MapServers, ApiOperation::ReadAll) => {
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            let addrs: Vec<String> = xtr
                .map_servers()
                .iter()
                .map(|m| m.addr.to_string())
                .collect();
            Ok(serde_json::to_vec(&addrs)?)
        }
        (ApiTarget::MapServers, ApiOperation::Create) => {
            let dto: MapServerDto = serde_json::from_slice(payload)?;
            let addr = dto
                .address
                .parse()
                .map_err(|_| ApiError::BadAddress(dto.address.clone()))?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.add_map_server(MapServer {
                addr,
                key: dto.key,
                proxy_reply: dto.proxy_reply,
            });
            xtr.send_registers(ctx);
            Ok(Vec::new())
        }
        (ApiTarget::MapServers, ApiOperation::Delete) => {
            let dto: EidDto = serde_json::from_slice(payload)?;
            let addr = dto
                .eid
                .parse()
                .map_err(|_| ApiError::BadAddress(dto.eid.clone()))?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.remove_map_server(addr);
            Ok(Vec::new())
        }
        (ApiTarget::Petrs, ApiOperation::ReadAll) => {
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            let dtos: Vec<RlocDto> = xtr
                .petrs()
                .locators()
                .iter()
                .map(|l| RlocDto {
                    address: l.address().to_string(),
                    priority: l.priority(),
                    weight: l.weight(),
                    state: Some(format!("{:?}", l.state())),
                })
                .collect();
            Ok(serde_json::to_vec(&dtos)?)
        }
        (ApiTarget::Petrs, ApiOperation::Create) => {
            let dto: RlocDto = serde_json::from_slice(payload)?;
            let addr: Address = dto
                .address
                .parse()
                .map_err(|_| ApiError::BadAddress(dto.address.clone()))?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.add_petr(Locator::petr(addr, dto.priority, dto.weight));
            Ok(Vec::new())
        }
        (ApiTarget::Petrs, ApiOperation::Delete) => {
            let dto: RlocDto = serde_json::from_slice(payload)?;
            let addr: Address = dto
                .address
                .parse()
                .map_err(|_| ApiError::BadAddress(dto.address.clone()))?;
            let xtr = device.as_xtr_mut().ok_or(ApiError::WrongRole)?;
            xtr.remove_petr(&addr);
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = ApiHeader {
            device: ApiDevice::Xtr,
            target: ApiTarget::MapCache,
            operation: ApiOperation::ReadAll,
            msg_type: ApiMsgType::Request,
            datalen: 0,
        };

        let mut out = WriteBuffer::new();
        let n = header.write(&mut out).unwrap();
        assert_eq!(n, API_HEADER_LEN);

        let mut buf = ReadBuffer::new(out.bytes());
        assert_eq!(ApiHeader::read(&mut buf).unwrap(), header);
    }

    #[test]
    fn mapping_dto_roundtrip() {
        let mut mapping = Mapping::new("10.0.0.0/24".parse().unwrap(), 10);
        mapping
            .add_locator(Locator::remote(
                "192.0.2.1".parse().unwrap(),
                LocatorState::Up,
                1,
                100,
            ))
            .unwrap();

        let dto = MappingDto::from_mapping(&mapping);
        let back = dto.to_mapping(false).unwrap();

        assert_eq!(back.eid(), mapping.eid());
        assert_eq!(back.locators().len(), 1);
    }
}
