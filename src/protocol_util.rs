use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use uuid::Uuid;

/// Wall clock in milliseconds, the unit keep-alive ids and latencies are measured in.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Locks a std mutex, carrying on with the inner value if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Name based (version 3) UUID, used for players when the server runs offline.
pub(crate) fn name_uuid(name: &str) -> Uuid {
    let digest = Md5::digest(name.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest);
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Canonical text form: 36 lowercase characters, dashes after bytes 4, 6, 8 and 10.
pub(crate) fn uuid_to_string(uuid: &Uuid) -> String {
    uuid.hyphenated().to_string()
}

#[macro_export]
macro_rules! packet_base {
    ($packet_name:ident $id:literal {
        $( $field:ident : $field_type:ty ),* $(,)*
    }) => {
        // wire layouts carry fields the server has no use for
        #[allow(dead_code)]
        #[derive(Debug)]
        pub(crate) struct $packet_name {
            $(
                pub(crate) $field : $field_type,
            )*
        }

        impl $crate::protocol_types::traits::SizedProt for $packet_name {
            fn prot_size(&self) -> usize {
                0 $(+ $crate::protocol_types::traits::SizedProt::prot_size(&self.$field))*
            }
        }

        impl std::fmt::Display for $packet_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", stringify!($packet_name))?;
                Ok(())
            }
        }
    };
}

#[macro_export]
macro_rules! packet {
    // handler provided: server-bound packet
    ($packet_name:ident $id:literal {
        $( $field:ident : $field_type:ty ),* $(,)*
    }, handler |$this:ident, $session:ident, $server:ident| $closure:expr) => {
        $crate::packet_base!($packet_name $id {
            $( $field : $field_type ),*
        });

        #[::async_trait::async_trait]
        impl $crate::protocol_types::traits::ServerPacket for $packet_name {
            fn id() -> u8 {
                $id
            }

            async fn handle(
                &self,
                $session: &mut $crate::connection::Session,
                $server: &std::sync::Arc<$crate::Server>,
            ) -> Result<(), $crate::err::ProtError> {
                let $this = self;
                $closure
            }
        }

        #[::async_trait::async_trait]
        impl $crate::protocol_types::traits::ReadProt for $packet_name {
            #[allow(unused_variables)]
            async fn read(
                stream: &mut (impl tokio::io::AsyncRead + Unpin + Send),
            ) -> Result<Self, String>
            where
                Self: Sized,
            {
                Ok($packet_name {
                    $(
                        $field: <$field_type as $crate::protocol_types::traits::ReadProt>::read(stream).await?,
                    )*
                })
            }
        }
    };
    // no handler provided: client-bound packet
    ($packet_name:ident $id:literal {
        $( $field:ident : $field_type:ty ),* $(,)*
    }) => {
        $crate::packet_base!($packet_name $id {
            $( $field : $field_type ),*
        });

        impl $crate::protocol_types::traits::ClientPacket for $packet_name {
            fn id() -> u8 {
                $id
            }
        }

        impl $packet_name {
            #[allow(clippy::too_many_arguments)]
            pub(crate) fn new($($field : $field_type,)*) -> Self {
                Self {
                    $(
                        $field,
                    )*
                }
            }
        }

        #[::async_trait::async_trait]
        impl $crate::protocol_types::traits::WriteProt for $packet_name {
            #[allow(unused_variables)]
            async fn write(
                &self,
                stream: &mut (impl tokio::io::AsyncWrite + Unpin + Send),
            ) -> Result<(), String> {
                $(
                    $crate::protocol_types::traits::WriteProt::write(&self.$field, stream).await?;
                )*
                Ok(())
            }
        }
    };
}
