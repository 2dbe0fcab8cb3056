diesel::table! {
    invoices (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        invoice_number -> Varchar,
        client_name -> Varchar,
        client_email -> Nullable<Varchar>,
        total -> Numeric,
        amount_paid -> Numeric,
        currency -> Varchar,
        issue_date -> Timestamptz,
        due_date -> Timestamptz,
        status -> Varchar,
        escalation_level -> Int4,
        follow_up_count -> Int4,
        last_follow_up_at -> Nullable<Timestamptz>,
        next_action_date -> Nullable<Timestamptz>,
        agent_notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    collection_actions (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        invoice_id -> Uuid,
        run_id -> Nullable<Uuid>,
        action_type -> Varchar,
        channel -> Varchar,
        status -> Varchar,
        email_subject -> Nullable<Text>,
        email_body -> Nullable<Text>,
        recipient -> Nullable<Varchar>,
        reasoning -> Text,
        error -> Nullable<Text>,
        metadata -> Jsonb,
        scheduled_for -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        executed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    payment_plans (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        invoice_id -> Uuid,
        total_amount -> Numeric,
        installment_count -> Int4,
        installment_amount -> Numeric,
        start_date -> Timestamptz,
        next_due_date -> Timestamptz,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    execution_logs (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        status -> Varchar,
        invoices_processed -> Int4,
        actions_created -> Int4,
        emails_sent -> Int4,
        errors -> Int4,
        started_at -> Timestamptz,
        finished_at -> Nullable<Timestamptz>,
        duration_ms -> Nullable<Int8>,
        summary -> Nullable<Text>,
        error -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    invoices,
    collection_actions,
    payment_plans,
    execution_logs,
);
