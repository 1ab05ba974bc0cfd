use tokio::time::Duration;

use super::*;

#[tokio::test]
async fn test_buffer_preserves_packet_boundaries() -> Result<()> {
    let buffer = Buffer::new(0, 0);
    let mut packet = vec![0u8; 4];

    buffer.write(&[0, 1]).await?;
    buffer.write(&[2, 3, 4]).await?;

    let n = buffer.read(&mut packet, None).await?;
    assert_eq!(&packet[..n], &[0, 1]);
    let n = buffer.read(&mut packet, None).await?;
    assert_eq!(&packet[..n], &[2, 3, 4]);
    assert_eq!(buffer.count().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_buffer_short_read() -> Result<()> {
    let buffer = Buffer::new(0, 0);
    buffer.write(&[0, 1, 2, 3]).await?;

    let mut packet = vec![0u8; 3];
    let result = buffer.read(&mut packet, None).await;
    assert_eq!(result, Err(Error::ErrBufferShort));

    Ok(())
}

#[tokio::test]
async fn test_buffer_limits() -> Result<()> {
    let buffer = Buffer::new(2, 0);
    buffer.write(&[0]).await?;
    buffer.write(&[1]).await?;
    assert_eq!(buffer.write(&[2]).await, Err(Error::ErrBufferFull));

    let buffer = Buffer::new(0, 3);
    buffer.write(&[0, 1]).await?;
    assert_eq!(buffer.write(&[2, 3]).await, Err(Error::ErrBufferFull));

    Ok(())
}

#[tokio::test]
async fn test_buffer_close_unblocks_reader() -> Result<()> {
    let buffer = Buffer::new(0, 0);
    let reader = buffer.clone();

    let handle = tokio::spawn(async move {
        let mut packet = vec![0u8; 16];
        reader.read(&mut packet, None).await
    });

    buffer.close().await;
    let result = handle.await.unwrap();
    assert_eq!(result, Err(Error::ErrBufferClosed));

    assert_eq!(buffer.write(&[0]).await, Err(Error::ErrBufferClosed));

    Ok(())
}

#[tokio::test]
async fn test_buffer_read_timeout() {
    let buffer = Buffer::new(0, 0);
    let mut packet = vec![0u8; 16];
    let result = buffer
        .read(&mut packet, Some(Duration::from_millis(20)))
        .await;
    assert_eq!(result, Err(Error::ErrTimeout));
}
