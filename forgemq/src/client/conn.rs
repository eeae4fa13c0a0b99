//! Handles the transport level connection.
//!
//! One task per accepted transport owns the socket, the connection driver
//! and the connection handler. Incoming bytes are fed to the driver, whose
//! dispatch fires the handler callbacks; work items posted by other
//! entities arrive on the connection's work queue and run interleaved with
//! the socket events, all on this one task.

use forgemq_codec::frame::ErrorCondition;
use forgemq_engine::{ConnectionDriver, ConnectionOptions};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::handler::ConnectionHandler;
use crate::container::Context;
use crate::error::Result;
use crate::workqueue;

/// Drives one client connection until the transport reaches its end.
pub async fn handle_client<S>(socket: S, context: Context) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (work, mut work_rx) = workqueue::channel();
    let shutdown = context.container.shutdown_token();

    let mut driver = ConnectionDriver::new();
    driver.accept(ConnectionOptions {
        container_id: Some(context.container.id().to_string()),
    });

    let mut handler = ConnectionHandler::new(context, work);
    let (mut reader, mut writer) = tokio::io::split(socket);
    // Socket reads land here first; the driver's read buffer cannot be
    // borrowed across the select.
    let mut read_buf = [0u8; 8 * 1024];
    let mut closing = false;

    loop {
        if !driver.dispatch(&mut handler) {
            break;
        }

        if let Err(e) = flush(&mut driver, &mut writer).await {
            driver.disconnected(ErrorCondition::new("forgemq:io", e.to_string()));
            driver.dispatch(&mut handler);

            return Err(e.into());
        }

        tokio::select! {
            read = reader.read(&mut read_buf) => match read {
                Ok(0) => {
                    trace!("Transport closed by the peer");

                    driver.read_close();
                    driver.disconnected(ErrorCondition::default());
                }
                Ok(n) => {
                    driver.read_buffer()[..n].copy_from_slice(&read_buf[..n]);
                    driver.read_done(n);
                }
                Err(e) => {
                    driver.read_close();
                    driver.disconnected(ErrorCondition::new("forgemq:io", e.to_string()));
                }
            },
            Some(command) = work_rx.recv() => {
                handler.handle_command(driver.connection_mut(), command);
            }
            _ = shutdown.cancelled(), if !closing => {
                closing = true;
                driver.connection_mut().close(ErrorCondition::default());
            }
        }
    }

    Ok(())
}

async fn flush<W>(driver: &mut ConnectionDriver, writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while !driver.write_buffer().is_empty() {
        let n = writer.write(driver.write_buffer()).await?;
        driver.write_done(n);
    }

    Ok(())
}
