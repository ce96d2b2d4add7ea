//! Binlog replication client.
//!
//! Opens a replication connection to a MySQL primary, performs the
//! handshake and checksum negotiation, issues `COM_BINLOG_DUMP`, and
//! exposes a lazy `next_event()` pull interface yielding decoded
//! binlog events in binlog order. RowsEvents are fully decoded into
//! logical row-change `Event`s here, using the live TableMap.

use crate::auth;
use crate::connection::ConnectionConfig;
use crate::decode;
use crate::error::{CdcError, Result};
use crate::events::{Event, EventType as ChangeEventType};
use crate::gtid::GtidSet;
use crate::position::Position;
use crate::protocol::{self, GreetingPacket, PacketChannel};
use crate::table_map::{parse_column_defs, ColumnDef, TableMapEntry, TableMapRegistry};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use tracing::{debug, info, warn};

const COM_BINLOG_DUMP: u8 = 0x12;
const COM_BINLOG_DUMP_GTID: u8 = 0x1e;
const EVENT_HEADER_SIZE: usize = 19;
/// Consecutive TableMap/Rows decode failures after which `next_event`
/// escalates to `CdcError::Transport`, handing the stream to the Canal
/// Instance's reconnect loop instead of skipping silently forever.
const PROTOCOL_ERROR_ESCALATION_THRESHOLD: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinlogEventType {
    Query,
    Rotate,
    FormatDescription,
    TableMap,
    WriteRowsV1,
    UpdateRowsV1,
    DeleteRowsV1,
    WriteRowsV2,
    UpdateRowsV2,
    DeleteRowsV2,
    Xid,
    Gtid,
    Heartbeat,
    Other(u8),
}

impl BinlogEventType {
    fn from_u8(b: u8) -> Self {
        match b {
            0x02 => BinlogEventType::Query,
            0x04 => BinlogEventType::Rotate,
            0x0F => BinlogEventType::FormatDescription,
            0x13 => BinlogEventType::TableMap,
            0x17 => BinlogEventType::WriteRowsV1,
            0x18 => BinlogEventType::UpdateRowsV1,
            0x19 => BinlogEventType::DeleteRowsV1,
            0x1E => BinlogEventType::WriteRowsV2,
            0x1F => BinlogEventType::UpdateRowsV2,
            0x20 => BinlogEventType::DeleteRowsV2,
            0x10 => BinlogEventType::Xid,
            0x21 => BinlogEventType::Gtid,
            0x1B => BinlogEventType::Heartbeat,
            other => BinlogEventType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EventHeader {
    #[allow(dead_code)]
    timestamp: u32,
    event_type: BinlogEventType,
    #[allow(dead_code)]
    server_id: u32,
    #[allow(dead_code)]
    event_size: u32,
    log_pos: u32,
    #[allow(dead_code)]
    flags: u16,
}

fn parse_header(data: &[u8]) -> Result<EventHeader> {
    if data.len() < EVENT_HEADER_SIZE {
        return Err(CdcError::Protocol("event header shorter than 19 bytes".into()));
    }
    let mut cursor = Cursor::new(data);
    let timestamp = cursor.read_u32::<LittleEndian>().map_err(|e| CdcError::Protocol(e.to_string()))?;
    let event_type = cursor.read_u8().map_err(|e| CdcError::Protocol(e.to_string()))?;
    let server_id = cursor.read_u32::<LittleEndian>().map_err(|e| CdcError::Protocol(e.to_string()))?;
    let event_size = cursor.read_u32::<LittleEndian>().map_err(|e| CdcError::Protocol(e.to_string()))?;
    let log_pos = cursor.read_u32::<LittleEndian>().map_err(|e| CdcError::Protocol(e.to_string()))?;
    let flags = cursor.read_u16::<LittleEndian>().map_err(|e| CdcError::Protocol(e.to_string()))?;
    Ok(EventHeader {
        timestamp,
        event_type: BinlogEventType::from_u8(event_type),
        server_id,
        event_size,
        log_pos,
        flags,
    })
}

/// One decoded element of the replication stream, as handed to the
/// Canal Instance pump.
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    Rotate { next_file: String, position: u64 },
    FormatDescription { checksum_enabled: bool },
    Query { database: String, sql: String },
    Xid { xid: u64 },
    Gtid { gtid: String },
    Rows(Vec<Event>),
    Heartbeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    New,
    Connecting,
    Preparing,
    Streaming,
    Stopped,
    Failed,
}

pub struct BinlogClient {
    config: ConnectionConfig,
    position: Position,
    watch: Option<HashSet<(String, String)>>,
    channel: Option<PacketChannel>,
    table_map: TableMapRegistry,
    checksum_len: usize,
    state: ClientState,
    stopped: bool,
    gtid_enabled: bool,
    /// Real column names per `(schema, table)`, resolved by the Canal
    /// Instance from the Meta Store or an admin schema query. Falls back
    /// to `TableMapEntry::to_table_meta`'s own `col_N` placeholders for
    /// tables with no entry here.
    column_names: HashMap<(String, String), Vec<String>>,
    protocol_error_streak: u32,
}

impl BinlogClient {
    pub fn new(
        config: ConnectionConfig,
        position: Position,
        watch: Option<HashSet<(String, String)>>,
        gtid_enabled: bool,
    ) -> Self {
        BinlogClient {
            config,
            position,
            watch,
            channel: None,
            table_map: TableMapRegistry::new(),
            checksum_len: 0,
            state: ClientState::New,
            stopped: false,
            gtid_enabled,
            column_names: HashMap::new(),
            protocol_error_streak: 0,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn position(&self) -> Position {
        self.position.clone()
    }

    /// Seeds the real column names for `(schema, table)`, used in place of
    /// `col_N` placeholders the next time its TableMap is decoded.
    pub fn set_column_names(&mut self, schema: &str, table: &str, columns: Vec<String>) {
        self.column_names.insert((schema.to_string(), table.to_string()), columns);
    }

    fn watched(&self, schema: &str, table: &str) -> bool {
        match &self.watch {
            None => true,
            Some(set) => {
                set.contains(&(schema.to_string(), table.to_string()))
                    || set.contains(&(String::new(), table.to_string()))
                    || set.contains(&(schema.to_string(), String::new()))
            }
        }
    }

    /// Connects, authenticates, negotiates checksums, and issues
    /// `COM_BINLOG_DUMP` at the client's current position.
    pub async fn start(&mut self) -> Result<()> {
        self.state = ClientState::Connecting;

        let mut channel = PacketChannel::connect(&self.config.hostname, self.config.port, self.config.timeout).await?;

        let greeting_packet = channel.read_packet().await?;
        let greeting = GreetingPacket::parse(&greeting_packet)?;
        info!(version = %greeting.server_version, thread_id = greeting.thread_id, "mysql handshake received");

        self.state = ClientState::Preparing;

        let auth_response = auth::create_handshake_response(
            &self.config.username,
            &self.config.password,
            self.config.database.as_deref(),
            &greeting.scramble,
            greeting.server_collation,
            &greeting.auth_plugin_name,
        )
        .map_err(|e| CdcError::Config(format!("failed to build auth response: {e}")))?;

        channel.write_packet(&auth_response, 1).await?;

        let auth_result = channel.read_packet().await?;
        if protocol::is_error_packet(&auth_result) {
            self.state = ClientState::Failed;
            return Err(CdcError::Config("mysql authentication failed".into()));
        }

        self.run_query(&mut channel, "SET @master_binlog_checksum = @@global.binlog_checksum").await?;

        let heartbeat_nanos = self.config.heartbeat_interval.as_nanos();
        self.run_query(&mut channel, &format!("SET @master_heartbeat_period = {heartbeat_nanos}")).await?;

        let dump_command = if self.gtid_enabled {
            let gtid_set = self
                .position
                .gtid_set
                .as_deref()
                .map(GtidSet::parse)
                .transpose()?
                .unwrap_or_default();
            Self::create_binlog_dump_gtid_command(self.config.server_id, &gtid_set)?
        } else {
            Self::create_binlog_dump_command(self.config.server_id, &self.position.file, self.position.offset as u64)?
        };
        channel.write_packet(&dump_command, 0).await?;

        self.channel = Some(channel);
        self.state = ClientState::Streaming;
        self.stopped = false;
        info!(file = %self.position.file, offset = self.position.offset, "binlog dump started");
        Ok(())
    }

    async fn run_query(&mut self, channel: &mut PacketChannel, sql: &str) -> Result<()> {
        let mut packet = vec![0x03]; // COM_QUERY
        packet.write_all(sql.as_bytes()).map_err(CdcError::Io)?;
        channel.write_packet(&packet, 0).await?;
        let result = channel.read_packet().await?;
        if protocol::is_error_packet(&result) {
            warn!(%sql, "query returned an error packet, continuing");
        }
        Ok(())
    }

    fn create_binlog_dump_command(server_id: u32, binlog_filename: &str, binlog_position: u64) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.write_u8(COM_BINLOG_DUMP).map_err(CdcError::Io)?;
        buffer.write_u32::<LittleEndian>(binlog_position as u32).map_err(CdcError::Io)?;
        buffer.write_u16::<LittleEndian>(0).map_err(CdcError::Io)?; // non-blocking
        buffer.write_u32::<LittleEndian>(server_id).map_err(CdcError::Io)?;
        buffer.write_all(binlog_filename.as_bytes()).map_err(CdcError::Io)?;
        Ok(buffer)
    }

    /// `COM_BINLOG_DUMP_GTID`: command(1) + flags(2) + server_id(4) +
    /// schema_len(4, always 0 here) + gtid_data_len(4) + gtid_data, where
    /// gtid_data is `n_sids(8) + per-sid(uuid(16) + n_intervals(8) +
    /// per-interval(start(8) + end-exclusive(8)))`.
    fn create_binlog_dump_gtid_command(server_id: u32, gtid_set: &GtidSet) -> Result<Vec<u8>> {
        let mut gtid_data = Vec::new();
        gtid_data.write_u64::<LittleEndian>(gtid_set.sets.len() as u64).map_err(CdcError::Io)?;
        for uuid_set in gtid_set.sets.values() {
            gtid_data.write_all(&parse_uuid_bytes(&uuid_set.uuid)?).map_err(CdcError::Io)?;
            gtid_data.write_u64::<LittleEndian>(uuid_set.ranges.len() as u64).map_err(CdcError::Io)?;
            for range in &uuid_set.ranges {
                gtid_data.write_u64::<LittleEndian>(range.start).map_err(CdcError::Io)?;
                gtid_data.write_u64::<LittleEndian>(range.end + 1).map_err(CdcError::Io)?;
            }
        }

        let mut buffer = Vec::new();
        buffer.write_u8(COM_BINLOG_DUMP_GTID).map_err(CdcError::Io)?;
        buffer.write_u16::<LittleEndian>(0).map_err(CdcError::Io)?; // flags
        buffer.write_u32::<LittleEndian>(server_id).map_err(CdcError::Io)?;
        buffer.write_u32::<LittleEndian>(0).map_err(CdcError::Io)?; // schema_len
        buffer.write_u32::<LittleEndian>(gtid_data.len() as u32).map_err(CdcError::Io)?;
        buffer.write_all(&gtid_data).map_err(CdcError::Io)?;
        Ok(buffer)
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        self.channel = None;
        self.state = ClientState::Stopped;
    }

    /// Reads and decodes the next event. Returns `Ok(None)` once
    /// `stop()` has been called.
    pub async fn next_event(&mut self) -> Result<Option<DecodedEvent>> {
        if self.stopped {
            return Ok(None);
        }
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| CdcError::Transport("binlog client not started".into()))?;

        let packet = channel.read_packet().await?;
        if self.stopped {
            return Ok(None);
        }

        if protocol::is_error_packet(&packet) {
            self.state = ClientState::Failed;
            return Err(CdcError::Transport("received error packet from replication stream".into()));
        }
        if protocol::is_eof_packet(&packet) {
            self.state = ClientState::Stopped;
            return Ok(None);
        }
        if packet.is_empty() {
            return Ok(Some(DecodedEvent::Heartbeat));
        }

        // First byte of a binlog network event is the OK marker 0x00.
        let event_data = if packet[0] == 0x00 && packet.len() > 1 { &packet[1..] } else { &packet[..] };

        let header = match parse_header(event_data) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "malformed event header, skipping");
                return Ok(Some(DecodedEvent::Heartbeat));
            }
        };

        let body_start = EVENT_HEADER_SIZE;
        let body_end = event_data.len().saturating_sub(self.checksum_len);
        let body = if body_end > body_start { &event_data[body_start..body_end] } else { &[][..] };

        let decoded = self.decode_event(header, body);

        if self.protocol_error_streak > PROTOCOL_ERROR_ESCALATION_THRESHOLD {
            self.state = ClientState::Failed;
            return Err(CdcError::Transport(format!(
                "{PROTOCOL_ERROR_ESCALATION_THRESHOLD} consecutive protocol decode failures, escalating for reconnect"
            )));
        }

        match header.event_type {
            BinlogEventType::Rotate => {
                // position advance handled inside decode_event via self.position
            }
            _ => {
                if self.position.offset < header.log_pos {
                    self.position.offset = header.log_pos;
                }
            }
        }

        Ok(decoded)
    }

    fn decode_event(&mut self, header: EventHeader, body: &[u8]) -> Option<DecodedEvent> {
        match header.event_type {
            BinlogEventType::Rotate => self.decode_rotate(body),
            BinlogEventType::FormatDescription => self.decode_format_description(body),
            BinlogEventType::TableMap => {
                match self.decode_table_map(body) {
                    Ok(()) => self.protocol_error_streak = 0,
                    Err(e) => {
                        self.protocol_error_streak += 1;
                        warn!(error = %e, "failed to decode table map, skipping");
                    }
                }
                None
            }
            BinlogEventType::WriteRowsV1 | BinlogEventType::WriteRowsV2 => {
                self.decode_rows(body, RowsKind::Write, header.log_pos)
            }
            BinlogEventType::UpdateRowsV1 | BinlogEventType::UpdateRowsV2 => {
                self.decode_rows(body, RowsKind::Update, header.log_pos)
            }
            BinlogEventType::DeleteRowsV1 | BinlogEventType::DeleteRowsV2 => {
                self.decode_rows(body, RowsKind::Delete, header.log_pos)
            }
            BinlogEventType::Query => self.decode_query(body),
            BinlogEventType::Xid => self.decode_xid(body),
            BinlogEventType::Gtid => self.decode_gtid(body),
            BinlogEventType::Heartbeat => Some(DecodedEvent::Heartbeat),
            BinlogEventType::Other(code) => {
                debug!(event_type = code, "unrecognized event type, skipping");
                None
            }
        }
    }

    fn decode_rotate(&mut self, body: &[u8]) -> Option<DecodedEvent> {
        if body.len() < 8 {
            warn!("rotate event too short, skipping");
            return None;
        }
        let position = LittleEndian::read_u64(body);
        let next_file = String::from_utf8_lossy(&body[8..]).to_string();
        self.position.file = next_file.clone();
        self.position.offset = position as u32;
        self.table_map.flush();
        Some(DecodedEvent::Rotate { next_file, position })
    }

    fn decode_format_description(&mut self, body: &[u8]) -> Option<DecodedEvent> {
        // Layout: binlog_version(2) server_version(50) create_ts(4)
        // header_len(1) ...post-header lengths..., then one byte per
        // event type; the trailing byte for RowsEvents advertises
        // whether a CRC32 checksum footer is present (1) or not (0/absent).
        let checksum_enabled = body.last().map(|&b| b == 1).unwrap_or(false);
        self.checksum_len = if checksum_enabled { 4 } else { 0 };
        Some(DecodedEvent::FormatDescription { checksum_enabled })
    }

    fn decode_table_map(&mut self, body: &[u8]) -> Result<()> {
        if body.len() < 8 {
            return Err(CdcError::Decode("table map event too short".into()));
        }
        let mut cursor = Cursor::new(body);
        let table_id = cursor
            .read_u48::<LittleEndian>()
            .map_err(|e| CdcError::Decode(format!("table_id: {e}")))?;
        let _flags = cursor.read_u16::<LittleEndian>().map_err(|e| CdcError::Decode(e.to_string()))?;

        let db_len = cursor.read_u8().map_err(|e| CdcError::Decode(e.to_string()))? as usize;
        let mut db_bytes = vec![0u8; db_len];
        Read::read_exact(&mut cursor, &mut db_bytes).map_err(|e| CdcError::Decode(e.to_string()))?;
        cursor.set_position(cursor.position() + 1); // null terminator
        let schema = String::from_utf8_lossy(&db_bytes).to_string();

        let tbl_len = cursor.read_u8().map_err(|e| CdcError::Decode(e.to_string()))? as usize;
        let mut tbl_bytes = vec![0u8; tbl_len];
        Read::read_exact(&mut cursor, &mut tbl_bytes).map_err(|e| CdcError::Decode(e.to_string()))?;
        cursor.set_position(cursor.position() + 1);
        let table = String::from_utf8_lossy(&tbl_bytes).to_string();

        if !self.watched(&schema, &table) {
            return Ok(());
        }

        let column_count = decode::read_lcb(&mut cursor)? as usize;
        let mut column_types = vec![0u8; column_count];
        Read::read_exact(&mut cursor, &mut column_types).map_err(|e| CdcError::Decode(e.to_string()))?;

        let meta_len = decode::read_lcb(&mut cursor)? as usize;
        let mut meta_block = vec![0u8; meta_len];
        Read::read_exact(&mut cursor, &mut meta_block).map_err(|e| CdcError::Decode(e.to_string()))?;

        let nullable_len = decode::bitmap_len(column_count);
        let mut nullable_bitmap = vec![0u8; nullable_len];
        let _ = Read::read_exact(&mut cursor, &mut nullable_bitmap);

        let columns: Vec<ColumnDef> = parse_column_defs(&column_types, &meta_block)?;

        self.table_map.insert(
            table_id,
            TableMapEntry {
                schema,
                table,
                columns,
                null_bitmap: nullable_bitmap,
            },
        );

        Ok(())
    }

    fn decode_rows(&mut self, body: &[u8], kind: RowsKind, log_pos: u32) -> Option<DecodedEvent> {
        match self.try_decode_rows(body, kind, log_pos) {
            Ok(events) if !events.is_empty() => {
                self.protocol_error_streak = 0;
                Some(DecodedEvent::Rows(events))
            }
            Ok(_) => {
                self.protocol_error_streak = 0;
                None
            }
            Err(e) => {
                self.protocol_error_streak += 1;
                warn!(error = %e, "failed to decode rows event, skipping");
                None
            }
        }
    }

    fn try_decode_rows(&mut self, body: &[u8], kind: RowsKind, log_pos: u32) -> Result<Vec<Event>> {
        if body.len() < 6 {
            return Err(CdcError::Decode("rows event too short".into()));
        }
        let mut cursor = Cursor::new(body);
        let table_id = cursor
            .read_u48::<LittleEndian>()
            .map_err(|e| CdcError::Decode(format!("table_id: {e}")))?;
        let _flags = cursor.read_u16::<LittleEndian>().map_err(|e| CdcError::Decode(e.to_string()))?;

        let Some(entry) = self.table_map.get(table_id).cloned() else {
            // table wasn't watched (no TableMap kept), or map flushed early
            return Ok(Vec::new());
        };

        let column_count = decode::read_lcb(&mut cursor)? as usize;
        let bitmap_bytes = decode::bitmap_len(column_count);

        let mut presence1 = vec![0u8; bitmap_bytes];
        Read::read_exact(&mut cursor, &mut presence1).map_err(|e| CdcError::Decode(e.to_string()))?;

        let presence2 = if kind == RowsKind::Update {
            let mut p2 = vec![0u8; bitmap_bytes];
            Read::read_exact(&mut cursor, &mut p2).map_err(|e| CdcError::Decode(e.to_string()))?;
            Some(p2)
        } else {
            None
        };

        let column_names = self.column_names.get(&(entry.schema.clone(), entry.table.clone()));
        let table_meta = entry.to_table_meta(column_names.map(|v| v.as_slice()));
        let mut events = Vec::new();
        let mut row_index = 0usize;
        let remaining = &body[cursor.position() as usize..];
        let mut offset = 0usize;

        while offset < remaining.len() {
            let chunk = &remaining[offset..];
            match kind {
                RowsKind::Write | RowsKind::Delete => {
                    let (row, consumed) = crate::table_map::decode_row(&entry.columns, &table_meta.columns, &presence1, chunk)?;
                    offset += consumed;
                    let event_type = if kind == RowsKind::Write { ChangeEventType::Insert } else { ChangeEventType::Delete };
                    let (before, after) = if kind == RowsKind::Write { (None, Some(row)) } else { (Some(row), None) };
                    events.push(Event {
                        id: Event::make_id(&self.position.file, log_pos, row_index),
                        schema: entry.schema.clone(),
                        table: entry.table.clone(),
                        event_type,
                        timestamp: chrono::Utc::now(),
                        position: Position::new(self.position.file.clone(), log_pos),
                        before,
                        after,
                        sql: None,
                    });
                }
                RowsKind::Update => {
                    let (mut before, consumed) = crate::table_map::decode_row(&entry.columns, &table_meta.columns, &presence1, chunk)?;
                    offset += consumed;
                    let chunk2 = &remaining[offset..];
                    let presence2 = presence2.as_ref().expect("update rows always carry two bitmaps");
                    let (mut after, consumed2) = crate::table_map::decode_row(&entry.columns, &table_meta.columns, presence2, chunk2)?;
                    offset += consumed2;

                    for (b, a) in before.iter_mut().zip(after.iter_mut()) {
                        a.updated = a.value != b.value;
                        let _ = b;
                    }

                    events.push(Event {
                        id: Event::make_id(&self.position.file, log_pos, row_index),
                        schema: entry.schema.clone(),
                        table: entry.table.clone(),
                        event_type: ChangeEventType::Update,
                        timestamp: chrono::Utc::now(),
                        position: Position::new(self.position.file.clone(), log_pos),
                        before: Some(before),
                        after: Some(after),
                        sql: None,
                    });
                }
            }
            row_index += 1;
        }

        Ok(events)
    }

    fn decode_query(&mut self, body: &[u8]) -> Option<DecodedEvent> {
        if body.len() < 13 {
            return None;
        }
        let mut cursor = Cursor::new(body);
        let _thread_id = cursor.read_u32::<LittleEndian>().ok()?;
        let _exec_time = cursor.read_u32::<LittleEndian>().ok()?;
        let db_len = cursor.read_u8().ok()? as usize;
        let _error_code = cursor.read_u16::<LittleEndian>().ok()?;
        let status_len = cursor.read_u16::<LittleEndian>().ok()? as usize;
        cursor.set_position(cursor.position() + status_len as u64);

        let mut db_bytes = vec![0u8; db_len];
        if db_len > 0 {
            Read::read_exact(&mut cursor, &mut db_bytes).ok()?;
        }
        let database = String::from_utf8_lossy(&db_bytes).to_string();
        let _ = cursor.read_u8();

        let remaining = &body[cursor.position() as usize..];
        let sql = String::from_utf8_lossy(remaining).to_string();

        Some(DecodedEvent::Query { database, sql })
    }

    fn decode_xid(&mut self, body: &[u8]) -> Option<DecodedEvent> {
        if body.len() < 8 {
            return None;
        }
        Some(DecodedEvent::Xid { xid: LittleEndian::read_u64(body) })
    }

    fn decode_gtid(&mut self, body: &[u8]) -> Option<DecodedEvent> {
        if body.len() < 25 {
            return None;
        }
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&body[1..17]);
        let uuid = format_uuid(&uuid_bytes);
        let sequence = LittleEndian::read_u64(&body[17..25]);
        Some(DecodedEvent::Gtid { gtid: format!("{uuid}:{sequence}") })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowsKind {
    Write,
    Update,
    Delete,
}

/// Parses a canonical `8-4-4-4-12` UUID string into its 16 raw bytes.
fn parse_uuid_bytes(uuid: &str) -> Result<[u8; 16]> {
    let hex: String = uuid.chars().filter(|c| *c != '-').collect();
    if hex.len() != 32 {
        return Err(CdcError::Protocol(format!("invalid uuid in gtid set: {uuid}")));
    }
    let mut bytes = [0u8; 16];
    for i in 0..16 {
        bytes[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| CdcError::Protocol(format!("invalid uuid in gtid set: {uuid}")))?;
    }
    Ok(bytes)
}

fn format_uuid(bytes: &[u8; 16]) -> String {
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_header_parses_known_layout() {
        let mut data = vec![];
        data.extend_from_slice(&1700000000u32.to_le_bytes());
        data.push(0x02); // Query
        data.extend_from_slice(&42u32.to_le_bytes());
        data.extend_from_slice(&100u32.to_le_bytes());
        data.extend_from_slice(&12345u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());

        let header = parse_header(&data).unwrap();
        assert_eq!(header.event_type, BinlogEventType::Query);
        assert_eq!(header.server_id, 42);
        assert_eq!(header.log_pos, 12345);
    }

    #[test]
    fn format_uuid_produces_canonical_form() {
        let bytes = [
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0,
        ];
        let uuid = format_uuid(&bytes);
        assert_eq!(uuid.len(), 36);
        assert!(uuid.contains('-'));
    }

    #[test]
    fn binlog_event_type_maps_known_codes() {
        assert_eq!(BinlogEventType::from_u8(0x04), BinlogEventType::Rotate);
        assert_eq!(BinlogEventType::from_u8(0x1E), BinlogEventType::WriteRowsV2);
        assert_eq!(BinlogEventType::from_u8(0x21), BinlogEventType::Gtid);
        assert_eq!(BinlogEventType::from_u8(0xAA), BinlogEventType::Other(0xAA));
    }

    #[test]
    fn new_client_starts_in_new_state() {
        let client = BinlogClient::new(ConnectionConfig::default(), Position::initial(), None, false);
        assert_eq!(client.state(), ClientState::New);
        assert_eq!(client.position(), Position::initial());
    }
}
