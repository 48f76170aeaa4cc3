use crate::mirror::MirrorTarget;
use crate::transfer::{ImageTransfer, TransferError, TransferOperation};
use json_patch::{PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use std::collections::HashMap;
use tracing::{debug, info};

/// `replace` operation pointing container `index` of the pod template at `image`.
pub fn replace_image(index: usize, image: String) -> PatchOperation {
    let index = index.to_string();
    PatchOperation::Replace(ReplaceOperation {
        path: PointerBuf::from_tokens([
            "spec",
            "template",
            "spec",
            "containers",
            index.as_str(),
            "image",
        ]),
        value: serde_json::Value::String(image),
    })
}

#[derive(Debug, thiserror::Error)]
#[error("failed to {operation} docker image {image}: {source}")]
pub struct PatchError {
    pub operation: TransferOperation,
    pub image: String,
    #[source]
    pub source: TransferError,
}

/// Copies every container image that is not yet mirrored and returns the
/// patch pointing the containers at their copies.
///
/// Indices in the patch paths are the containers' positions in `images`;
/// skipped containers leave a gap. Any failed transfer aborts the whole list.
/// Identical images within one call are transferred once.
pub async fn build_patches(
    transfer: &dyn ImageTransfer,
    target: &MirrorTarget,
    images: &[Option<String>],
) -> Result<Vec<PatchOperation>, PatchError> {
    let mut patches = Vec::new();
    let mut mirrored: HashMap<&str, String> = HashMap::new();

    for (index, image) in images.iter().enumerate() {
        let Some(image) = image.as_deref().filter(|i| !i.is_empty()) else {
            debug!(index, "Container has no image, skipping");
            continue;
        };
        if target.is_mirrored(image) {
            debug!(index, image, "Image already in mirror registry, skipping");
            continue;
        }

        let new_image = match mirrored.get(image) {
            Some(new_image) => new_image.clone(),
            None => {
                let new_image = mirror_image(transfer, target, image).await?;
                mirrored.insert(image, new_image.clone());
                new_image
            }
        };

        info!(index, image, mirrored = %new_image, "Rewriting container image");
        patches.push(replace_image(index, new_image));
    }

    Ok(patches)
}

async fn mirror_image(
    transfer: &dyn ImageTransfer,
    target: &MirrorTarget,
    image: &str,
) -> Result<String, PatchError> {
    transfer
        .pull(image)
        .await
        .map_err(failed(TransferOperation::Pull, image))?;

    let new_image = target.mirrored_image(image);
    transfer
        .tag(image, &new_image)
        .await
        .map_err(failed(TransferOperation::Tag, image))?;

    transfer
        .push(&new_image)
        .await
        .map_err(failed(TransferOperation::Push, &new_image))?;

    Ok(new_image)
}

fn failed(
    operation: TransferOperation,
    image: &str,
) -> impl FnOnce(TransferError) -> PatchError + use<> {
    let image = image.to_string();
    move |source| PatchError {
        operation,
        image,
        source,
    }
}
