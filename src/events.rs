//! Event log, comments and attachments.
//!
//! Events are append-only audit rows written in the same batch as the
//! change they describe. Comments and attachments are separate entities
//! and never appear in the event list.

use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    encode_message_parts, summarize_message, Attachment, Comment, Event, EventAction, Task,
};
use crate::engine::TaskEngine;
use crate::error::TaskError;
use crate::store::keys;
use crate::store::{kind_prefix, make_child_key, make_key, make_prefix, StorageBackend, WriteBatch};

fn comment_not_found(comment_id: &str) -> TaskError {
    TaskError::NotFound {
        entity: "comment",
        id: comment_id.to_string(),
    }
}

fn require_message(message: Option<&str>) -> Result<&str, TaskError> {
    message.ok_or_else(|| TaskError::NotValid("Message is null".to_string()))
}

fn newest_first(a: &Comment, b: &Comment) -> std::cmp::Ordering {
    b.time.cmp(&a.time).then(b.sequence.cmp(&a.sequence))
}

impl<B: StorageBackend> TaskEngine<B> {
    // ---- Events ----

    /// Stages one audit event for `task`.
    pub(crate) fn stage_event(
        &self,
        task: &Task,
        action: EventAction,
        parts: &[&str],
        batch: &mut WriteBatch,
    ) -> Result<(), TaskError> {
        let event = Event {
            task_id: task.id().to_string(),
            process_instance_id: task.process_instance_id.clone(),
            action,
            message: encode_message_parts(parts),
            time: self.now(),
            sequence: self.next_sequence(),
        };
        let key = make_child_key(keys::EVENT, task.id(), &Uuid::new_v4().to_string());
        batch.append(key, Self::encode("Event", &event)?);
        Ok(())
    }

    /// Audit events of a task, most recent first. Unknown tasks have none.
    pub async fn get_task_events(&self, task_id: &str) -> Result<Vec<Event>, TaskError> {
        let rows = self
            .backend()
            .list_by_prefix(&make_prefix(keys::EVENT, task_id))
            .await
            .map_err(Self::map_storage_error)?;
        let mut events = Vec::with_capacity(rows.len());
        for (_, record) in rows {
            let event: Event = Self::decode("Event", &record.data)?;
            if event.task_id == task_id {
                events.push(event);
            }
        }
        events.sort_by(|a, b| b.time.cmp(&a.time).then(b.sequence.cmp(&a.sequence)));
        Ok(events)
    }

    // ---- Comments ----

    async fn load_comment(&self, comment_id: &str) -> Result<Option<Comment>, TaskError> {
        let record = self
            .backend()
            .try_get(&make_key(keys::COMMENT, comment_id))
            .await
            .map_err(Self::map_storage_error)?;
        record
            .map(|r| Self::decode("Comment", &r.data))
            .transpose()
    }

    async fn load_comments<F>(&self, keep: F) -> Result<Vec<Comment>, TaskError>
    where
        F: Fn(&Comment) -> bool,
    {
        let rows = self
            .backend()
            .list_by_prefix(&kind_prefix(keys::COMMENT))
            .await
            .map_err(Self::map_storage_error)?;
        let mut comments = Vec::new();
        for (_, record) in rows {
            let comment: Comment = Self::decode("Comment", &record.data)?;
            if keep(&comment) {
                comments.push(comment);
            }
        }
        comments.sort_by(newest_first);
        Ok(comments)
    }

    fn stage_comment(&self, comment: &Comment, batch: &mut WriteBatch) -> Result<(), TaskError> {
        batch.put(
            make_key(keys::COMMENT, &comment.id),
            Self::encode("Comment", comment)?,
        );
        Ok(())
    }

    fn rewrite_comment(&self, comment: &mut Comment, message: &str) {
        comment.full_message = message.to_string();
        comment.message = summarize_message(message, self.config().comment_summary_length);
        comment.time = self.now();
    }

    /// Adds a comment to a task, a process instance, or both.
    ///
    /// A task comment inherits the task's process instance when none is
    /// given and touches the task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotValid`] if neither id is given or the message is
    ///   missing. An empty message is a valid comment.
    /// - [`TaskError::NotFound`] if the task does not exist.
    pub async fn create_comment(
        &self,
        task_id: Option<&str>,
        process_instance_id: Option<&str>,
        user_id: Option<&str>,
        message: Option<&str>,
    ) -> Result<Comment, TaskError> {
        if task_id.is_none() && process_instance_id.is_none() {
            return Err(TaskError::NotValid(
                "Process instance id and task id is null".to_string(),
            ));
        }
        let message = require_message(message)?;

        let task = match task_id {
            Some(id) => Some(self.require_task(id).await?),
            None => None,
        };
        let process_instance_id = process_instance_id
            .map(String::from)
            .or_else(|| task.as_ref().and_then(|t| t.process_instance_id.clone()));

        let mut comment = Comment {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.map(String::from),
            process_instance_id,
            user_id: user_id.map(String::from),
            time: self.now(),
            message: String::new(),
            full_message: String::new(),
            sequence: self.next_sequence(),
        };
        self.rewrite_comment(&mut comment, message);

        let mut batch = WriteBatch::new();
        batch.insert(
            make_key(keys::COMMENT, &comment.id),
            Self::encode("Comment", &comment)?,
        );
        if let Some(mut task) = task {
            self.stage_touch(&mut task, &mut batch)?;
        }
        self.commit(batch).await?;
        debug!(comment_id = %comment.id, task_id, "comment created");
        Ok(comment)
    }

    /// One comment of a task.
    pub async fn get_task_comment(
        &self,
        task_id: &str,
        comment_id: &str,
    ) -> Result<Option<Comment>, TaskError> {
        Ok(self
            .load_comment(comment_id)
            .await?
            .filter(|c| c.task_id.as_deref() == Some(task_id)))
    }

    /// Comments of a task, most recent first.
    pub async fn get_task_comments(&self, task_id: &str) -> Result<Vec<Comment>, TaskError> {
        self.load_comments(|c| c.task_id.as_deref() == Some(task_id))
            .await
    }

    /// Comments of a process instance, most recent first.
    pub async fn get_process_instance_comments(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<Comment>, TaskError> {
        self.load_comments(|c| c.process_instance_id.as_deref() == Some(process_instance_id))
            .await
    }

    /// Replaces the message of a task comment and touches the task.
    pub async fn update_task_comment(
        &self,
        task_id: &str,
        comment_id: &str,
        message: Option<&str>,
    ) -> Result<(), TaskError> {
        let message = require_message(message)?;
        let mut task = self.require_task(task_id).await?;
        let mut comment = self
            .get_task_comment(task_id, comment_id)
            .await?
            .ok_or_else(|| comment_not_found(comment_id))?;
        self.rewrite_comment(&mut comment, message);

        let mut batch = WriteBatch::new();
        self.stage_comment(&comment, &mut batch)?;
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        debug!(comment_id, task_id, "task comment updated");
        Ok(())
    }

    /// Replaces the message of a process instance comment.
    pub async fn update_process_instance_comment(
        &self,
        process_instance_id: &str,
        comment_id: &str,
        message: Option<&str>,
    ) -> Result<(), TaskError> {
        let message = require_message(message)?;
        let mut comment = self
            .load_comment(comment_id)
            .await?
            .filter(|c| c.process_instance_id.as_deref() == Some(process_instance_id))
            .ok_or_else(|| comment_not_found(comment_id))?;
        self.rewrite_comment(&mut comment, message);

        let mut batch = WriteBatch::new();
        self.stage_comment(&comment, &mut batch)?;
        self.commit(batch).await?;
        Ok(())
    }

    /// Deletes one comment of a task. Unknown comments are ignored.
    pub async fn delete_task_comment(&self, task_id: &str, comment_id: &str) -> Result<(), TaskError> {
        let mut task = self.require_task(task_id).await?;
        let Some(comment) = self.get_task_comment(task_id, comment_id).await? else {
            return Ok(());
        };
        let mut batch = WriteBatch::new();
        batch.delete(make_key(keys::COMMENT, &comment.id));
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        debug!(comment_id, task_id, "task comment deleted");
        Ok(())
    }

    /// Deletes every comment of a task.
    pub async fn delete_task_comments(&self, task_id: &str) -> Result<(), TaskError> {
        let mut task = self.require_task(task_id).await?;
        let comments = self.get_task_comments(task_id).await?;
        if comments.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for comment in &comments {
            batch.delete(make_key(keys::COMMENT, &comment.id));
        }
        self.stage_touch(&mut task, &mut batch)?;
        self.commit(batch).await?;
        debug!(task_id, count = comments.len(), "task comments deleted");
        Ok(())
    }

    /// Deletes one comment of a process instance. Unknown comments are ignored.
    pub async fn delete_process_instance_comment(
        &self,
        process_instance_id: &str,
        comment_id: &str,
    ) -> Result<(), TaskError> {
        let comment = self
            .load_comment(comment_id)
            .await?
            .filter(|c| c.process_instance_id.as_deref() == Some(process_instance_id));
        let mut batch = WriteBatch::new();
        if let Some(comment) = comment {
            batch.delete(make_key(keys::COMMENT, &comment.id));
        }
        self.commit(batch).await?;
        Ok(())
    }

    /// Deletes every comment of a process instance.
    pub async fn delete_process_instance_comments(
        &self,
        process_instance_id: &str,
    ) -> Result<(), TaskError> {
        let mut batch = WriteBatch::new();
        for comment in self.get_process_instance_comments(process_instance_id).await? {
            batch.delete(make_key(keys::COMMENT, &comment.id));
        }
        self.commit(batch).await?;
        Ok(())
    }

    // ---- Attachments ----

    /// Creates an attachment. A task attachment logs an `AddAttachment`
    /// event and touches the task.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_attachment(
        &self,
        attachment_type: Option<&str>,
        task_id: Option<&str>,
        process_instance_id: Option<&str>,
        name: Option<&str>,
        description: Option<&str>,
        url: Option<&str>,
    ) -> Result<Attachment, TaskError> {
        let task = match task_id {
            Some(id) => Some(self.require_task(id).await?),
            None => None,
        };
        let attachment = Attachment {
            id: Uuid::new_v4().to_string(),
            name: name.map(String::from),
            description: description.map(String::from),
            attachment_type: attachment_type.map(String::from),
            task_id: task_id.map(String::from),
            process_instance_id: process_instance_id
                .map(String::from)
                .or_else(|| task.as_ref().and_then(|t| t.process_instance_id.clone())),
            url: url.map(String::from),
            create_time: self.now(),
        };

        let mut batch = WriteBatch::new();
        batch.insert(
            make_key(keys::ATTACHMENT, &attachment.id),
            Self::encode("Attachment", &attachment)?,
        );
        if let Some(mut task) = task {
            self.stage_event(
                &task,
                EventAction::AddAttachment,
                &[name.unwrap_or_default()],
                &mut batch,
            )?;
            self.stage_touch(&mut task, &mut batch)?;
        }
        self.commit(batch).await?;
        debug!(attachment_id = %attachment.id, task_id, "attachment created");
        Ok(attachment)
    }

    /// Loads an attachment.
    pub async fn get_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>, TaskError> {
        let record = self
            .backend()
            .try_get(&make_key(keys::ATTACHMENT, attachment_id))
            .await
            .map_err(Self::map_storage_error)?;
        record
            .map(|r| Self::decode("Attachment", &r.data))
            .transpose()
    }

    /// Attachments of a task, oldest first.
    pub async fn get_task_attachments(&self, task_id: &str) -> Result<Vec<Attachment>, TaskError> {
        let rows = self
            .backend()
            .list_by_prefix(&kind_prefix(keys::ATTACHMENT))
            .await
            .map_err(Self::map_storage_error)?;
        let mut attachments = Vec::new();
        for (_, record) in rows {
            let attachment: Attachment = Self::decode("Attachment", &record.data)?;
            if attachment.task_id.as_deref() == Some(task_id) {
                attachments.push(attachment);
            }
        }
        attachments.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        Ok(attachments)
    }

    /// Stores new name and description of an existing attachment and
    /// touches the owning task, if any.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the attachment does not exist.
    pub async fn save_attachment(&self, attachment: &Attachment) -> Result<(), TaskError> {
        let mut stored = self
            .get_attachment(&attachment.id)
            .await?
            .ok_or_else(|| TaskError::NotFound {
                entity: "attachment",
                id: attachment.id.clone(),
            })?;
        stored.name = attachment.name.clone();
        stored.description = attachment.description.clone();
        let mut batch = WriteBatch::new();
        batch.put(
            make_key(keys::ATTACHMENT, &stored.id),
            Self::encode("Attachment", &stored)?,
        );
        if let Some(task_id) = &stored.task_id {
            if let Some(mut task) = self.load_task(task_id).await? {
                self.stage_touch(&mut task, &mut batch)?;
            }
        }
        self.commit(batch).await?;
        debug!(attachment_id = %stored.id, task_id = stored.task_id.as_deref(), "attachment saved");
        Ok(())
    }

    async fn remove_attachment(&self, attachment: &Attachment) -> Result<(), TaskError> {
        let mut batch = WriteBatch::new();
        batch.delete(make_key(keys::ATTACHMENT, &attachment.id));
        if let Some(task_id) = &attachment.task_id {
            if let Some(mut task) = self.load_task(task_id).await? {
                self.stage_event(
                    &task,
                    EventAction::DeleteAttachment,
                    &[attachment.name.as_deref().unwrap_or_default()],
                    &mut batch,
                )?;
                self.stage_touch(&mut task, &mut batch)?;
            }
        }
        self.commit(batch).await?;
        debug!(attachment_id = %attachment.id, "attachment deleted");
        Ok(())
    }

    /// Deletes an attachment. Unknown ids are ignored.
    pub async fn delete_attachment(&self, attachment_id: &str) -> Result<(), TaskError> {
        match self.get_attachment(attachment_id).await? {
            Some(attachment) => self.remove_attachment(&attachment).await,
            None => Ok(()),
        }
    }

    /// Deletes an attachment of a task.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] if the attachment does not belong to the task.
    pub async fn delete_task_attachment(
        &self,
        task_id: &str,
        attachment_id: &str,
    ) -> Result<(), TaskError> {
        let attachment = self
            .get_attachment(attachment_id)
            .await?
            .filter(|a| a.task_id.as_deref() == Some(task_id))
            .ok_or_else(|| TaskError::NotFound {
                entity: "attachment",
                id: attachment_id.to_string(),
            })?;
        self.remove_attachment(&attachment).await
    }
}
