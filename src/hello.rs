use crate::{
    bson::{Bson, DateTime, Document, ObjectId},
    bson_util,
    client::options::ServerAddress,
    cmap::{Command, Connection},
    doc,
    error::Result,
    sdam::{ServerType, TopologyVersion},
    selection_criteria::TagSet,
};

/// The legacy version of the `hello` command which was deprecated in 5.0.
/// To limit usages of the legacy name in the codebase, this constant should be used
/// wherever possible.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";

/// Construct a hello or legacy hello command, depending on the circumstances.
///
/// If the server previously indicated `helloOk: true`, then `hello` will be used. Otherwise
/// legacy hello is used, and if it's unknown whether the server supports hello, the command
/// also advertises `helloOk: true`.
pub(crate) fn hello_command(
    hello_ok: Option<bool>,
    app_name: Option<&str>,
    compressors: Option<&[crate::compression::Compressor]>,
) -> Command {
    let (mut body, command_name) = if matches!(hello_ok, Some(true)) {
        (doc! { "hello": 1 }, "hello")
    } else {
        let mut body = doc! { LEGACY_HELLO_COMMAND_NAME: 1 };
        if hello_ok.is_none() {
            body.insert("helloOk", true);
        }
        (body, LEGACY_HELLO_COMMAND_NAME)
    };

    if let Some(app_name) = app_name {
        body.insert(
            "client",
            doc! { "application": doc! { "name": app_name } },
        );
    }

    if let Some(compressors) = compressors {
        body.insert(
            "compression",
            compressors
                .iter()
                .map(|c| Bson::String(c.name().to_string()))
                .collect::<Vec<_>>(),
        );
    }

    Command::new(command_name, "admin", body)
}

/// Execute a hello or legacy hello command.
pub(crate) async fn run_hello(conn: &mut Connection, command: Command) -> Result<HelloReply> {
    let response = conn.send_command(command).await?;
    let body = response.checked_body()?;
    Ok(HelloReply {
        server_address: conn.address.clone(),
        command_response: HelloCommandResponse::parse(&body),
        raw_command_response: body,
    })
}

#[derive(Debug, Clone)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
    #[allow(unused)]
    pub(crate) raw_command_response: Document,
}

/// The response to a `hello` command.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/command/hello/) for more details.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is writable. If true, this instance is a primary in a replica
    /// set, a mongos instance, or a standalone mongod.
    pub(crate) is_writable_primary: Option<bool>,

    /// Legacy name for `is_writable_primary`.
    pub(crate) is_master: Option<bool>,

    /// Whether the server supports the `hello` command for monitoring instead of the
    /// legacy hello command.
    pub(crate) hello_ok: Option<bool>,

    /// The list of all hosts.
    pub(crate) hosts: Option<Vec<String>>,

    /// The list of all passives in a replica set.
    pub(crate) passives: Option<Vec<String>>,

    /// The list of all arbiters in a replica set.
    pub(crate) arbiters: Option<Vec<String>>,

    /// An optional message. This contains the value "isdbgrid" when returned from a mongos.
    pub(crate) msg: Option<String>,

    /// The address of the server that returned this response.
    pub(crate) me: Option<String>,

    /// The list of compatible compressors that the server returned.
    pub(crate) compressors: Option<Vec<String>>,

    /// The current replica set config version.
    pub(crate) set_version: Option<i32>,

    /// The name of the current replica set.
    pub(crate) set_name: Option<String>,

    /// Whether the server is hidden.
    pub(crate) hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub(crate) secondary: Option<bool>,

    /// Whether the server is an arbiter.
    pub(crate) arbiter_only: Option<bool>,

    /// Whether the server is an uninitialized replica set member.
    pub(crate) is_replica_set: Option<bool>,

    /// Optime and date information for the server's most recent write operation.
    pub(crate) last_write: Option<LastWrite>,

    /// The minimum wire version that the server supports.
    pub(crate) min_wire_version: Option<i32>,

    /// The maximum wire version that the server supports.
    pub(crate) max_wire_version: Option<i32>,

    /// User-defined tags for a replica set member.
    pub(crate) tags: Option<TagSet>,

    /// A unique identifier for each election.
    pub(crate) election_id: Option<ObjectId>,

    /// The address of the current primary member of the replica set.
    pub(crate) primary: Option<String>,

    /// A list of SASL mechanisms used to create the user's credential(s).
    pub(crate) sasl_supported_mechs: Option<Vec<String>>,

    /// For internal use.
    pub(crate) topology_version: Option<TopologyVersion>,

    /// The maximum permitted size of a BSON object in bytes.
    pub(crate) max_bson_object_size: Option<i64>,

    /// The maximum number of write operations permitted in a write batch.
    pub(crate) max_write_batch_size: Option<i64>,

    /// The maximum permitted size of a BSON wire protocol message.
    pub(crate) max_message_size_bytes: Option<i64>,
}

fn string_array(doc: &Document, key: &str) -> Option<Vec<String>> {
    doc.get_array(key).map(|arr| {
        arr.iter()
            .filter_map(Bson::as_str)
            .map(String::from)
            .collect()
    })
}

impl HelloCommandResponse {
    pub(crate) fn parse(doc: &Document) -> Self {
        let get_int = |key: &str| doc.get(key).and_then(bson_util::get_int);
        Self {
            is_writable_primary: doc.get_bool("isWritablePrimary"),
            is_master: doc.get_bool("ismaster"),
            hello_ok: doc.get_bool("helloOk"),
            hosts: string_array(doc, "hosts"),
            passives: string_array(doc, "passives"),
            arbiters: string_array(doc, "arbiters"),
            msg: doc.get_str("msg").map(String::from),
            me: doc.get_str("me").map(str::to_lowercase),
            compressors: string_array(doc, "compression"),
            set_version: get_int("setVersion").map(|v| v as i32),
            set_name: doc.get_str("setName").map(String::from),
            hidden: doc.get_bool("hidden"),
            secondary: doc.get_bool("secondary"),
            arbiter_only: doc.get_bool("arbiterOnly"),
            is_replica_set: doc.get_bool("isreplicaset"),
            last_write: doc.get_document("lastWrite").and_then(LastWrite::parse),
            min_wire_version: get_int("minWireVersion").map(|v| v as i32),
            max_wire_version: get_int("maxWireVersion").map(|v| v as i32),
            tags: doc.get_document("tags").map(|tags| {
                tags.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            }),
            election_id: doc.get_object_id("electionId"),
            primary: doc.get_str("primary").map(str::to_lowercase),
            sasl_supported_mechs: string_array(doc, "saslSupportedMechs"),
            topology_version: doc
                .get_document("topologyVersion")
                .and_then(TopologyVersion::parse),
            max_bson_object_size: get_int("maxBsonObjectSize"),
            max_write_batch_size: get_int("maxWriteBatchSize"),
            max_message_size_bytes: get_int("maxMessageSizeBytes"),
        }
    }

    /// Derives the server's role from the reply fields.
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LastWrite {
    pub(crate) last_write_date: DateTime,
}

impl LastWrite {
    fn parse(doc: &Document) -> Option<Self> {
        Some(LastWrite {
            last_write_date: doc.get_datetime("lastWriteDate")?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn server_type_derivation() {
        let mongos = HelloCommandResponse::parse(&doc! { "msg": "isdbgrid", "ok": 1 });
        assert_eq!(mongos.server_type(), ServerType::Mongos);

        let primary = HelloCommandResponse::parse(&doc! {
            "ismaster": true,
            "setName": "rs0",
            "hosts": vec!["a:27017", "b:27017"],
        });
        assert_eq!(primary.server_type(), ServerType::RsPrimary);
        assert_eq!(
            primary.hosts,
            Some(vec!["a:27017".to_string(), "b:27017".to_string()])
        );

        let secondary = HelloCommandResponse::parse(&doc! {
            "ismaster": false,
            "secondary": true,
            "setName": "rs0",
        });
        assert_eq!(secondary.server_type(), ServerType::RsSecondary);

        let standalone = HelloCommandResponse::parse(&doc! { "ismaster": true });
        assert_eq!(standalone.server_type(), ServerType::Standalone);

        let ghost = HelloCommandResponse::parse(&doc! { "isreplicaset": true });
        assert_eq!(ghost.server_type(), ServerType::RsGhost);
    }

    #[test]
    fn limits_coerce_from_any_numeric_type() {
        let reply = HelloCommandResponse::parse(&doc! {
            "ismaster": true,
            "maxBsonObjectSize": 16777216.0,
            "maxWriteBatchSize": 100000i64,
            "maxMessageSizeBytes": 48000000,
        });
        assert_eq!(reply.max_bson_object_size, Some(16777216));
        assert_eq!(reply.max_write_batch_size, Some(100000));
        assert_eq!(reply.max_message_size_bytes, Some(48000000));
    }
}
